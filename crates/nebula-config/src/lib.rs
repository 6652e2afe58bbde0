//! Configuration for the height graph tools.
//!
//! Settings persist to disk as RON files. Command-line flags override what was
//! loaded, and unknown or missing fields fall back to defaults so config files
//! survive version changes in both directions.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{ArenaConfig, Config, DebugConfig, SchedulerSettings, TerrainSettings};
pub use error::ConfigError;
