//! Compute-once cell for fallible, expensive initialisation.
//!
//! `OnceLock::get_or_try_init` is not stable, so a separate init mutex
//! serialises first access. Readers after population never touch the mutex.

use std::sync::{Mutex, OnceLock, PoisonError};

pub struct Lazy<T> {
    cell: OnceLock<T>,
    init_lock: Mutex<()>,
}

impl<T> Lazy<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Return the cached value, computing it with `init` if absent.
    ///
    /// At most one `init` runs at a time; concurrent callers block until it
    /// finishes and then observe the same value. A failed `init` leaves the
    /// cell empty so a later call can retry.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let _guard = self
            .init_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self::new()
    }
}
