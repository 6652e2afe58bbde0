//! Evaluate a height graph description for one terrain tile.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p nebula-graph-cli -- --graph hills.ron --resolution 512`
//! and add `--png previews` to write an image per output.

mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use glam::DVec2;
use nebula_config::{CliArgs, Config, ConfigError};
use nebula_heightgraph::debug_viz::{DebugImage, render_height, render_weights};
use nebula_heightgraph::{
    BranchOutputs, EngineConfig, EvalError, FinalizedGraph, Graph, GraphDesc, GraphError,
    HeightGraphEngine, SchedulerConfig, TerrainConfig,
};
use tracing::info;

use crate::summary::OutputSummary;

/// Anything that stops the tool from producing its report.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read graph {path}: {source}")]
    ReadGraph {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write {path}: {source}")]
    WritePng {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    EncodePng {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },

    #[error("{0} output(s) left their declared range")]
    RangeViolation(usize),
}

/// Parse `path` as RON, or JSON when the extension says so.
fn load_graph(path: &Path) -> Result<FinalizedGraph, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ReadGraph {
        path: path.to_path_buf(),
        source,
    })?;
    let desc = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => GraphDesc::from_json(&text)?,
        _ => GraphDesc::from_ron(&text)?,
    };
    let graph = Graph::from_desc(desc)?.finalize()?;
    info!(
        path = %path.display(),
        nodes = graph.graph().node_count(),
        outputs = graph.output_nodes().len(),
        "graph finalized"
    );
    Ok(graph)
}

fn engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig {
            worker_threads: config.scheduler.worker_threads,
            batch_size: config.scheduler.batch_size,
        },
        arena_chunk_capacity: config.arena.chunk_capacity,
    }
}

fn terrain_config(config: &Config) -> TerrainConfig {
    TerrainConfig {
        origin: DVec2::new(config.terrain.origin_x, config.terrain.origin_y),
        resolution: config.terrain.resolution,
        cell_size: config.terrain.cell_size,
        seed: config.terrain.seed,
    }
}

/// One summary per height output and per weight list element.
fn summarize(outputs: &BranchOutputs) -> Vec<OutputSummary> {
    let mut summaries: Vec<_> = outputs
        .heights()
        .map(|(name, data)| OutputSummary::of(name, data))
        .collect();
    for (name, list) in outputs.weight_lists() {
        summaries.extend(
            list.iter()
                .enumerate()
                .map(|(i, data)| OutputSummary::of(format!("{name}[{i}]"), data)),
        );
    }
    summaries
}

fn write_png(path: PathBuf, image: &DebugImage) -> Result<(), CliError> {
    let bytes = image.encode_png().map_err(|source| CliError::EncodePng {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, bytes).map_err(|source| CliError::WritePng {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "preview written");
    Ok(())
}

/// Write `<name>.png` into `dir` for every output.
fn export_previews(
    outputs: &BranchOutputs,
    dir: &Path,
    resolution: u32,
    sea_level: f32,
) -> Result<usize, CliError> {
    std::fs::create_dir_all(dir).map_err(|source| CliError::WritePng {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut written = 0;
    for (name, data) in outputs.heights() {
        write_png(dir.join(format!("{name}.png")), &render_height(data, sea_level))?;
        written += 1;
    }
    for (name, list) in outputs.weight_lists() {
        write_png(dir.join(format!("{name}.png")), &render_weights(list, resolution))?;
        written += 1;
    }
    Ok(written)
}

/// Evaluate the graph named by `args` under `config` and report.
fn run(args: &CliArgs, config: &Config) -> Result<Vec<OutputSummary>, CliError> {
    config.validate()?;
    let graph = load_graph(&args.graph)?;
    evaluate_graph(&graph, config)
}

/// Evaluate `graph`, wait for every output and summarise it. A kernel panic
/// fails the whole run before anything is summarised or exported.
fn evaluate_graph(graph: &FinalizedGraph, config: &Config) -> Result<Vec<OutputSummary>, CliError> {
    let engine = HeightGraphEngine::new(engine_config(config))?;

    let started = Instant::now();
    let outputs = engine.evaluate(graph, terrain_config(config))?;
    let finished = outputs.wait();
    let stats = outputs.stats();
    info!(
        kernels = stats.kernels,
        derived_branches = stats.derived_branches,
        sweeps = stats.sweeps,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "evaluation finished"
    );
    finished?;

    let summaries = summarize(&outputs);
    if let Some(dir) = &config.debug.export_png {
        let written = export_previews(
            &outputs,
            dir,
            config.terrain.resolution,
            config.debug.sea_level,
        )?;
        info!(written, dir = %dir.display(), "previews exported");
    }
    Ok(summaries)
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config_dir();

    // Load or create config, then apply CLI overrides
    let mut config = match &config_dir {
        Some(dir) => Config::load_or_create(dir).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.map(|dir| dir.join("logs"));
    nebula_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    let summaries = match run(&args, &config) {
        Ok(summaries) => summaries,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    for summary in &summaries {
        println!("{summary}");
    }
    let violations = summaries.iter().filter(|s| !s.within_declared()).count();
    if violations > 0 {
        eprintln!("error: {}", CliError::RangeViolation(violations));
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
