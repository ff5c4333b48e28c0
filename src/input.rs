//! Input collaborator
//!
//! The host writes the latest key press into a shared `Input`; the engine takes
//! a snapshot at the start of each reaction so conditions see a stable value for
//! the whole tick. After the tick the did-tick callback clears it.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Input {
    key: Arc<Mutex<String>>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, key: impl Into<String>) {
        *self.key.lock() = key.into();
    }

    /// Last pressed key, empty if none
    pub fn key(&self) -> String {
        self.key.lock().clone()
    }

    pub fn did_press_key(&self) -> bool {
        !self.key.lock().is_empty()
    }

    pub fn clear(&self) {
        self.key.lock().clear();
    }
}
