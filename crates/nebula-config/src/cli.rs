//! Command-line argument parsing for the graph evaluator.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Height graph evaluator command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "heightgraph", about = "Evaluate a height graph for one terrain tile")]
pub struct CliArgs {
    /// Graph description file (`.ron` or `.json`).
    #[arg(long)]
    pub graph: PathBuf,

    /// Samples per tile side.
    #[arg(long)]
    pub resolution: Option<u32>,

    /// World x of the tile origin.
    #[arg(long, allow_hyphen_values = true)]
    pub origin_x: Option<f64>,

    /// World y of the tile origin.
    #[arg(long, allow_hyphen_values = true)]
    pub origin_y: Option<f64>,

    /// World distance between samples.
    #[arg(long)]
    pub cell_size: Option<f64>,

    /// World seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker thread count (0 = automatic).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Directory for PNG previews of every output.
    #[arg(long)]
    pub png: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl CliArgs {
    /// Config directory to use: `--config` or the platform default.
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("nebula-heightgraph")))
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(resolution) = args.resolution {
            self.terrain.resolution = resolution;
        }
        if let Some(x) = args.origin_x {
            self.terrain.origin_x = x;
        }
        if let Some(y) = args.origin_y {
            self.terrain.origin_y = y;
        }
        if let Some(cell_size) = args.cell_size {
            self.terrain.cell_size = cell_size;
        }
        if let Some(seed) = args.seed {
            self.terrain.seed = seed;
        }
        if let Some(workers) = args.workers {
            self.scheduler.worker_threads = workers;
        }
        if let Some(ref dir) = args.png {
            self.debug.export_png = Some(dir.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            graph: PathBuf::from("graph.ron"),
            resolution: Some(64),
            origin_x: Some(-128.0),
            seed: Some(7),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.terrain.resolution, 64);
        assert_eq!(config.terrain.origin_x, -128.0);
        assert_eq!(config.terrain.seed, 7);
        // Non-overridden fields retain defaults
        assert_eq!(config.terrain.cell_size, 1.0);
        assert_eq!(config.scheduler.worker_threads, 0);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "heightgraph",
            "--graph",
            "hills.ron",
            "--origin-y",
            "-32.5",
            "--png",
            "out",
        ]);
        assert_eq!(args.graph, PathBuf::from("hills.ron"));
        assert_eq!(args.origin_y, Some(-32.5));
        assert_eq!(args.png, Some(PathBuf::from("out")));
        assert!(args.resolution.is_none());
    }

    #[test]
    fn test_explicit_config_dir_wins() {
        let args = CliArgs {
            config: Some(PathBuf::from("/tmp/hg")),
            ..CliArgs::default()
        };
        assert_eq!(args.config_dir(), Some(PathBuf::from("/tmp/hg")));
    }
}
