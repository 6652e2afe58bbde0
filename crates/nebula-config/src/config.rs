//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Worker pool settings.
    pub scheduler: SchedulerSettings,
    /// Sample arena settings.
    pub arena: ArenaConfig,
    /// Default tile evaluated when no flags say otherwise.
    pub terrain: TerrainSettings,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Worker thread count. `0` sizes the pool from the CPU count.
    pub worker_threads: usize,
    /// Sample indices per kernel job.
    pub batch_size: usize,
}

/// Arena configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArenaConfig {
    /// Samples per arena chunk.
    pub chunk_capacity: usize,
}

/// Terrain tile configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainSettings {
    /// Samples per side.
    pub resolution: u32,
    /// World distance between neighbouring samples.
    pub cell_size: f64,
    /// World seed.
    pub seed: u64,
    /// World x of sample (0, 0).
    pub origin_x: f64,
    /// World y of sample (0, 0).
    pub origin_y: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory that receives PNG previews of every output, if set.
    pub export_png: Option<PathBuf>,
    /// Normalised height drawn as the water line in previews.
    pub sea_level: f32,
}

// --- Default implementations ---

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            batch_size: 4096,
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 1 << 20,
        }
    }
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            resolution: 256,
            cell_size: 1.0,
            seed: 0,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            export_png: None,
            sea_level: 0.4,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.batch_size",
                reason: "must be at least 1",
            });
        }
        if self.arena.chunk_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "arena.chunk_capacity",
                reason: "must be at least 1",
            });
        }
        if self.terrain.resolution == 0 {
            return Err(ConfigError::Invalid {
                field: "terrain.resolution",
                reason: "must be at least 1",
            });
        }
        if !self.terrain.cell_size.is_finite() || self.terrain.cell_size <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "terrain.cell_size",
                reason: "must be finite and positive",
            });
        }
        if !self.terrain.origin_x.is_finite() || !self.terrain.origin_y.is_finite() {
            return Err(ConfigError::Invalid {
                field: "terrain.origin",
                reason: "must be finite",
            });
        }
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}
