//! Runtime configuration for the streaming core

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunable settings shared by the per-session subsystems.
///
/// The defaults reproduce the constants the core was designed around; a
/// deployment can override them from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Maximum number of resident tiles per image cache
    pub tile_cache_capacity: usize,

    /// Cap on the smoothing scratch buffer, in megabytes
    pub smoothing_temp_buffer_mb: usize,

    /// Flow window base constant; the window is constant * scaler * frame rate
    pub flow_window_constant: i32,

    /// Flow window scale factor
    pub flow_window_scaler: i32,

    /// Poll interval while an animation waits for a flow-control event, in ms
    pub flow_wait_ms: u64,

    /// Maximum rows per partial catalog filter response
    pub catalog_chunk_size: usize,

    /// Preview rows returned when a catalog is opened
    pub catalog_preview_rows: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tile_cache_capacity: 256,
            smoothing_temp_buffer_mb: 200,
            flow_window_constant: 5,
            flow_window_scaler: 2,
            flow_wait_ms: 100,
            catalog_chunk_size: 100_000,
            catalog_preview_rows: 50,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidFormat(format!("config: {}", e)))
    }

    /// The number of unacknowledged frames allowed at a given frame rate
    pub fn flow_window(&self, frame_rate: i32) -> i32 {
        self.flow_window_constant * self.flow_window_scaler * frame_rate
    }
}
