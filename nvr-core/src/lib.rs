//! Core of creamy-nvr, a small network video recorder.
//!
//! One supervisor per configured camera keeps an external capture command
//! running and reads its stderr to learn when files and archive segments
//! are opened. Closed segments land in an in-memory recording catalog and
//! get a thumbnail; a liveness monitor restarts streams that go quiet; a
//! pruner holds the on-disk archive and live segments inside age and size
//! budgets. A read-only HTTP surface projects the catalog and per-stream
//! status for the companion UI.

pub mod api;
pub mod catalog;
pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod loader;
pub mod loglines;
pub mod monitor;
pub mod prune;
pub mod stream;
pub mod supervisor;
pub mod thumbs;

pub use catalog::{Catalog, Recording};
pub use config::{load_config, Config, Input, MediaLayout, CONFIG_ENV_VAR, CONFIG_FILE};
pub use engine::{ensure_capture_script, Engine, EngineBuilder};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use stream::{Stream, StreamStatus};
