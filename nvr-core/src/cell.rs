use std::sync::RwLock;

/// Read/write container for a single value shared between tasks.
///
/// Loads take a shared lock and return a snapshot; stores take the exclusive
/// lock and replace the value. A cell that has never been stored yields the
/// type's default.
#[derive(Debug)]
pub struct StateCell<T> {
    inner: RwLock<T>,
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn load(&self) -> T {
        self.inner.read().unwrap().clone()
    }

    pub fn store(&self, value: T) {
        *self.inner.write().unwrap() = value;
    }
}

impl<T: Clone + Default> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn unstored_cell_yields_default() {
        let cell: StateCell<bool> = StateCell::default();
        assert!(!cell.load());
        let cell: StateCell<String> = StateCell::default();
        assert_eq!(cell.load(), "");
    }

    #[test]
    fn store_replaces_value() {
        let cell = StateCell::new(1u64);
        cell.store(2);
        assert_eq!(cell.load(), 2);
        cell.store(3);
        assert_eq!(cell.load(), 3);
    }

    #[test]
    fn shared_across_threads() {
        let cell = Arc::new(StateCell::new(0u64));
        let writer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for i in 1..=100 {
                    cell.store(i);
                }
            })
        };
        for _ in 0..100 {
            let _ = cell.load();
        }
        writer.join().unwrap();
        assert_eq!(cell.load(), 100);
    }
}
