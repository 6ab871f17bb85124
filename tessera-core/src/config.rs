//! Configuration of the scheduler, the tile store and the pyramid geometry.
//!
//! All values are optional so configuration files only need to mention what they change.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use tessera_tile_utils::TILESIZE;

/// Worker pool sizing.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of workers of the CPU-bound pool. Defaults to the number of available cores.
    pub cpu_threads: Option<NonZeroUsize>,
}

impl SchedulerConfig {
    #[must_use]
    pub fn cpu_threads(&self) -> usize {
        self.cpu_threads.map_or_else(num_cpus::get, NonZeroUsize::get)
    }
}

/// Default zlib level used for idle tiles. Fast levels keep reductions CPU bound.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Tile store behaviour.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Compress tiles that are not referenced by anyone. Enabled by default.
    pub compress: Option<bool>,
    /// zlib compression level, `0..=9`.
    pub compression_level: Option<u32>,
}

impl StorageConfig {
    #[must_use]
    pub fn compress(&self) -> bool {
        self.compress.unwrap_or(true)
    }

    #[must_use]
    pub fn compression_level(&self) -> u32 {
        self.compression_level
            .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
            .min(9)
    }
}

/// Pyramid geometry.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PyramidConfig {
    /// Edge length of a tile in pixels. Must be a multiple of 64. Defaults to 4096.
    pub tile_size: Option<u32>,
}

impl PyramidConfig {
    #[must_use]
    pub fn with_tile_size(tile_size: u32) -> Self {
        Self {
            tile_size: Some(tile_size),
        }
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size.unwrap_or(TILESIZE)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_yaml_snapshot;

    use super::*;

    #[test]
    fn defaults() {
        let storage = StorageConfig::default();
        assert!(storage.compress());
        assert_eq!(storage.compression_level(), DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(PyramidConfig::default().tile_size(), TILESIZE);
        assert!(SchedulerConfig::default().cpu_threads() >= 1);
    }

    #[test]
    fn clamps_compression_level() {
        let storage = StorageConfig {
            compress: Some(true),
            compression_level: Some(42),
        };
        assert_eq!(storage.compression_level(), 9);
    }

    #[test]
    fn parses_partial_yaml() {
        let cfg: StorageConfig = serde_yaml::from_str("compress: false").unwrap();
        assert!(!cfg.compress());
        assert_eq!(cfg.compression_level, None);

        let cfg: SchedulerConfig = serde_yaml::from_str("cpu_threads: 3").unwrap();
        assert_eq!(cfg.cpu_threads(), 3);

        assert!(serde_yaml::from_str::<SchedulerConfig>("cpu_threads: 0").is_err());
        assert!(serde_yaml::from_str::<PyramidConfig>("tilesize: 64").is_err());
    }

    #[test]
    fn skips_unset_values() {
        assert_yaml_snapshot!(PyramidConfig::with_tile_size(256), @"tile_size: 256");
        assert_yaml_snapshot!(StorageConfig::default(), @"{}");
    }
}
