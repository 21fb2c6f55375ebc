use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use nvr_core::api::{self, AppState};
use nvr_core::{ensure_capture_script, load_config, EngineBuilder};

#[derive(Parser, Debug)]
#[command(author, version, about = "creamy-nvr recording daemon", long_about = None)]
struct Cli {
    /// Path to the JSON configuration. The CREAMY_NVR_CONFIG environment
    /// variable, when non-empty, takes precedence over this file.
    #[arg(long, default_value = nvr_core::CONFIG_FILE)]
    config: PathBuf,
    /// HTTP listen address for the API, media tree, and UI.
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Logging comes up before the config is read, so configuration
    // failures are structured like every other event.
    let log_filter = init_logging();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load config");
            std::process::exit(1);
        }
    };
    if config.debug && std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        let _ = log_filter.reload(EnvFilter::new("debug"));
    }

    if let Err(error) = ensure_capture_script() {
        error!(%error, "failed to write rtsp-to-hls.sh, please create it manually");
        std::process::exit(1);
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                token.cancel();
            }
        });
    }

    let engine = EngineBuilder::new(config).start(token.clone());
    let state = AppState {
        streams: engine.streams.clone(),
        catalog: engine.catalog.clone(),
        layout: engine.layout.clone(),
    };

    if let Err(error) = api::serve(state, cli.listen, token.clone()).await {
        error!(%error, "http server error");
    }
    info!("end of main");
}

/// Installs the JSON subscriber with an info-level default, returning the
/// handle used to raise the level once the config's debug flag is known.
/// RUST_LOG, when set, wins over both.
fn init_logging() -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
    handle
}
