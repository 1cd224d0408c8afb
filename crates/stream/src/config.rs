use std::path::{Path, PathBuf};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use verdant_common::CullSettings;
use verdant_persist::StorageConfig;

/// Errors from loading or validating a [`StreamConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Placement of the chunk grid on the XZ plane, centred on `origin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Chunks along X and Z.
    pub chunk_count: [u32; 2],
    /// World-space XZ centre of the grid.
    pub origin: Vec2,
    /// World-space XZ extent of one chunk.
    pub chunk_size: Vec2,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            chunk_count: [8, 8],
            origin: Vec2::ZERO,
            chunk_size: Vec2::splat(32.0),
        }
    }
}

impl GridConfig {
    /// Reject grids that cannot be built: empty, out of id range, or with a
    /// non-positive chunk size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let [cx, cz] = self.chunk_count;
        if cx == 0 || cz == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid.chunk_count must be non-zero, got [{cx}, {cz}]"
            )));
        }
        if cx > i32::MAX as u32 || cz > i32::MAX as u32 {
            return Err(ConfigError::Invalid(
                "grid.chunk_count exceeds the chunk id range".into(),
            ));
        }
        let size = self.chunk_size;
        if !(size.x > 0.0 && size.y > 0.0) || !size.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "grid.chunk_size must be positive, got {size}"
            )));
        }
        Ok(())
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub grid: GridConfig,
    /// Manhattan radius, in chunks, of the resident set around the viewer.
    pub load_radius: u32,
    /// New loads started per frame.
    pub load_budget: usize,
    /// Recycled chunks kept for reuse; surplus is dropped. `None` keeps all.
    pub pool_capacity: Option<usize>,
    pub cull: CullSettings,
    pub storage: StorageConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            load_radius: 2,
            load_budget: 1,
            pool_capacity: None,
            cull: CullSettings::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded stream config");
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        self.grid.validate()?;
        if self.load_budget == 0 {
            return invalid("load_budget must be at least 1".into());
        }
        let cull = &self.cull;
        if cull.min_distance < 0.0 || cull.max_distance < cull.min_distance {
            return invalid(format!(
                "cull distances must satisfy 0 <= min <= max, got {} and {}",
                cull.min_distance, cull.max_distance
            ));
        }
        if cull.lod_blend < 0.0 {
            return invalid(format!("cull.lod_blend must not be negative, got {}", cull.lod_blend));
        }
        Ok(())
    }
}
