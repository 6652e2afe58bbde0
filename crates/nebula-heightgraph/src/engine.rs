//! Entry point: evaluate a finalized graph for one terrain tile.
//!
//! A [`HeightGraphEngine`] owns the worker pool and can be shared by
//! reference between threads; every [`HeightGraphEngine::evaluate`] call gets
//! its own arena, branch and node instances, so concurrent evaluations of the
//! same [`FinalizedGraph`] never share mutable state.

use std::time::Instant;

use crate::arena::Arena;
use crate::branch::{BranchData, BranchStats, BranchStatsSnapshot, TerrainConfig};
use crate::error::EvalError;
use crate::graph::FinalizedGraph;
use crate::height_data::HeightData;
use crate::node::PortValue;
use crate::nodes::RESULT_PORT;
use crate::scheduler::{JobScheduler, SchedulerConfig};

/// Engine construction parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Worker pool settings.
    pub scheduler: SchedulerConfig,
    /// Samples per arena chunk.
    pub arena_chunk_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            arena_chunk_capacity: 1 << 20,
        }
    }
}

/// Named results of one evaluation.
///
/// Buffers may still be in flight when this is returned; call
/// [`BranchOutputs::wait`] or read through [`HeightData::samples`].
#[derive(Debug)]
pub struct BranchOutputs {
    heights: Vec<(String, HeightData)>,
    weights: Vec<(String, Vec<HeightData>)>,
    stats: BranchStatsSnapshot,
}

impl BranchOutputs {
    /// Height output called `name`.
    pub fn height(&self, name: &str) -> Option<&HeightData> {
        self.heights.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Weight list output called `name`.
    pub fn weights(&self, name: &str) -> Option<&[HeightData]> {
        self.weights
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, list)| list.as_slice())
    }

    /// Every height output, in graph order.
    pub fn heights(&self) -> impl Iterator<Item = (&str, &HeightData)> {
        self.heights.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Every weight list output, in graph order.
    pub fn weight_lists(&self) -> impl Iterator<Item = (&str, &[HeightData])> {
        self.weights.iter().map(|(n, l)| (n.as_str(), l.as_slice()))
    }

    /// Block until every output buffer is written.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::KernelPanicked`] naming every output that a
    /// panicked kernel fed, directly or through upstream nodes. The whole
    /// branch should then be discarded.
    pub fn wait(&self) -> Result<(), EvalError> {
        for (_, data) in &self.heights {
            data.wait();
        }
        for data in self.weights.iter().flat_map(|(_, list)| list) {
            data.wait();
        }
        let outputs = self.panicked_outputs();
        if outputs.is_empty() {
            Ok(())
        } else {
            tracing::error!(?outputs, "branch abandoned after a kernel panic");
            Err(EvalError::KernelPanicked { outputs })
        }
    }

    /// Returns `true` if a kernel feeding any output panicked. Only
    /// meaningful after [`BranchOutputs::wait`].
    pub fn any_panicked(&self) -> bool {
        !self.panicked_outputs().is_empty()
    }

    fn panicked_outputs(&self) -> Vec<String> {
        let heights = self
            .heights
            .iter()
            .filter(|(_, d)| d.task.panicked())
            .map(|(name, _)| name.clone());
        let weights = self
            .weights
            .iter()
            .filter(|(_, list)| list.iter().any(|d| d.task.panicked()))
            .map(|(name, _)| name.clone());
        heights.chain(weights).collect()
    }

    /// Counters of the evaluation, including derived branches.
    pub fn stats(&self) -> BranchStatsSnapshot {
        self.stats
    }
}

/// Worker pool plus evaluation settings.
#[derive(Debug)]
pub struct HeightGraphEngine {
    scheduler: JobScheduler,
    config: EngineConfig,
}

impl HeightGraphEngine {
    /// Start the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Scheduler`] if a worker cannot be spawned.
    pub fn new(config: EngineConfig) -> Result<Self, EvalError> {
        let scheduler = JobScheduler::new(&config.scheduler)?;
        tracing::info!(
            workers = scheduler.worker_count(),
            arena_chunk_capacity = config.arena_chunk_capacity,
            "height graph engine ready"
        );
        Ok(Self { scheduler, config })
    }

    /// Settings the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared worker pool.
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Evaluate every output of `graph` for the tile described by `terrain`.
    ///
    /// Returns as soon as every kernel is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::InvalidTerrain`] for an unusable configuration
    /// and any runtime error of the branch, most notably
    /// [`EvalError::Deadlock`].
    pub fn evaluate(
        &self,
        graph: &FinalizedGraph,
        terrain: TerrainConfig,
    ) -> Result<BranchOutputs, EvalError> {
        terrain.validate()?;
        let started = Instant::now();
        let arena = Arena::new(self.config.arena_chunk_capacity);
        let stats = BranchStats::default();

        let cache = {
            let branch = BranchData::new(graph, &arena, &self.scheduler, &stats, terrain);
            let roots: Vec<_> = graph.output_nodes().iter().map(|(_, id)| *id).collect();
            crate::evaluator::run(&branch, &roots)?
        };

        let mut heights = Vec::new();
        let mut weights = Vec::new();
        for (name, id) in graph.output_nodes() {
            match cache.get(*id, RESULT_PORT) {
                Some(PortValue::Height(data)) => heights.push((name.clone(), data.clone())),
                Some(PortValue::List(list)) => weights.push((name.clone(), list.clone())),
                None => {
                    return Err(EvalError::UnexpectedValue {
                        node: *id,
                        port: RESULT_PORT.to_string(),
                    });
                }
            }
        }

        let snapshot = stats.snapshot();
        tracing::info!(
            outputs = heights.len() + weights.len(),
            kernels = snapshot.kernels,
            derived_branches = snapshot.derived_branches,
            sweeps = snapshot.sweeps,
            samples = arena.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "branch scheduled"
        );

        Ok(BranchOutputs {
            heights,
            weights,
            stats: snapshot,
        })
    }
}
