//! Configuration for tiled coverage reads.

use serde::{Deserialize, Serialize};

/// Configuration shared by the coverage views of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Decode tiles on first access instead of during `render`.
    pub deferred_tile_reading: bool,

    /// Memory budget, in megabytes, for keeping recently decoded tiles alive
    /// in the tile cache.
    pub tile_cache_retained_mb: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            deferred_tile_reading: false,
            tile_cache_retained_mb: 256,
        }
    }
}

impl CoverageConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COVERAGE_DEFERRED_TILES") {
            config.deferred_tile_reading = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("TILE_CACHE_RETAINED_MB") {
            if let Ok(size) = val.parse() {
                config.tile_cache_retained_mb = size;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_cache_retained_mb.checked_mul(1024 * 1024).is_none() {
            return Err("tile_cache_retained_mb is too large".to_string());
        }
        Ok(())
    }

    /// Get the tile cache retention budget in bytes.
    pub fn tile_cache_retained_bytes(&self) -> usize {
        self.tile_cache_retained_mb.saturating_mul(1024 * 1024)
    }
}
