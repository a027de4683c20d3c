//! Build configuration tree.
//!
//! Loaded from a JSON file; every key has a default so a bare `tilesmith
//! build --input x.pbf` works without one.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mjolnir: MjolnirConfig,
    pub tagtransform: TagTransformConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MjolnirConfig {
    /// Root directory tiles are written under (one subdirectory per level).
    pub tile_dir: PathBuf,
    /// Hierarchy levels, most detailed last. Only the most detailed level
    /// is built.
    pub hierarchy: Vec<LevelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelConfig {
    pub level: u8,
    /// Grid cell size in degrees.
    pub tile_size: f64,
}

/// Opaque script handles for an external tag transform. Carried through
/// verbatim; the built-in policy is used when unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagTransformConfig {
    pub node_script: Option<PathBuf>,
    pub node_function: Option<String>,
    pub way_script: Option<PathBuf>,
    pub way_function: Option<String>,
}

impl Default for MjolnirConfig {
    fn default() -> Self {
        Self {
            tile_dir: PathBuf::from("tiles"),
            hierarchy: vec![
                LevelConfig {
                    level: 0,
                    tile_size: 4.0,
                },
                LevelConfig {
                    level: 1,
                    tile_size: 1.0,
                },
                LevelConfig {
                    level: 2,
                    tile_size: 0.25,
                },
            ],
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open config {}", path.as_ref().display()))?;
        serde_json::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path.as_ref().display()))
    }

    /// The most detailed (highest-numbered) hierarchy level.
    pub fn local_level(&self) -> Result<&LevelConfig> {
        self.mjolnir
            .hierarchy
            .iter()
            .max_by_key(|l| l.level)
            .context("config defines no hierarchy levels")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mjolnir.tile_dir, PathBuf::from("tiles"));
        let local = config.local_level().unwrap();
        assert_eq!(local.level, 2);
        assert_eq!(local.tile_size, 0.25);
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mjolnir": {{"tile_dir": "/data/tiles",
                 "hierarchy": [{{"level": 0, "tile_size": 1.0}}]}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mjolnir.tile_dir, PathBuf::from("/data/tiles"));
        assert_eq!(config.local_level().unwrap().level, 0);
        assert!(config.tagtransform.way_script.is_none());
    }
}
