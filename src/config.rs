//! Store configuration.

use std::path::PathBuf;

use crate::types::SEG_MAX;

/// Tunables for one [`crate::storage::Storage`] instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the segment image and link contents.
    pub path: PathBuf,
    /// Discard any persisted state on startup.
    pub clear: bool,
    /// Hard cap on the number of segments the store may allocate.
    pub max_segments: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("semagraph-data"),
            clear: false,
            max_segments: SEG_MAX as u32,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Start from an empty graph, ignoring any persisted image.
    pub fn clear_on_start(mut self) -> Self {
        self.clear = true;
        self
    }

    pub fn max_segments(mut self, max: u32) -> Self {
        self.max_segments = max.min(SEG_MAX as u32);
        self
    }
}
