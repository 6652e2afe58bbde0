//! Per-tile evaluation context.
//!
//! A [`BranchData`] binds the shared arena and scheduler to one
//! [`TerrainConfig`]. Nodes allocate and schedule through it and memoize
//! per-node derived data in its [`BranchCache`]. Move-Origin and Grid-Scale
//! evaluate part of the graph in a derived branch that shares the arena and
//! scheduler but carries its own coordinate frame and cache.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use glam::DVec2;

use crate::arena::Arena;
use crate::error::EvalError;
use crate::graph::{Endpoint, FinalizedGraph, NodeId};
use crate::height_data::{HeightData, ValueRange};
use crate::node::PortValue;
use crate::scheduler::{JobHandle, JobScheduler};

/// Coordinate frame and size of one terrain tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainConfig {
    /// World position of local sample `(0, 0)`.
    pub origin: DVec2,
    /// Side length of the tile grid.
    pub resolution: u32,
    /// World distance between adjacent samples.
    pub cell_size: f64,
    /// Base seed for noise sources.
    pub seed: u64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            origin: DVec2::ZERO,
            resolution: 64,
            cell_size: 1.0,
            seed: 0,
        }
    }
}

impl TerrainConfig {
    /// Check the configuration can be evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::InvalidTerrain`] for a zero resolution or a
    /// non-positive or non-finite cell size.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.resolution == 0 {
            return Err(EvalError::InvalidTerrain("resolution must be at least 1"));
        }
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(EvalError::InvalidTerrain("cell size must be finite and positive"));
        }
        if !self.origin.is_finite() {
            return Err(EvalError::InvalidTerrain("origin must be finite"));
        }
        Ok(())
    }

    /// World position of a flattened local index.
    #[inline]
    pub fn world_position(&self, index: usize) -> DVec2 {
        let r = self.resolution.max(1) as usize;
        let x = (index % r) as f64;
        let y = (index / r) as f64;
        self.origin + DVec2::new(x, y) * self.cell_size
    }

    /// Same tile shifted by `offset` world units.
    pub fn translated(&self, offset: DVec2) -> Self {
        Self {
            origin: self.origin + offset,
            ..*self
        }
    }

    /// Same tile with origin and cell size multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            origin: self.origin * factor,
            cell_size: self.cell_size * factor,
            ..*self
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Lazily populated per-branch memoization table keyed by `(node, type)`.
///
/// Entries are never replaced once created.
#[derive(Default)]
pub struct BranchCache {
    entries: DashMap<(NodeId, TypeId), Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for BranchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl BranchCache {
    /// Return the `T` cached for `node`, building it with `init` on first use.
    ///
    /// Concurrent callers for the same key all receive the one stored
    /// instance. `init` runs with the entry locked and must not use the cache.
    pub fn get_or_insert_with<T, F>(&self, node: NodeId, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let key = (node, TypeId::of::<T>());
        match self.entries.entry(key) {
            Entry::Occupied(entry) => match Arc::clone(entry.get()).downcast::<T>() {
                Ok(typed) => typed,
                Err(_) => unreachable!("cache keys carry the TypeId of their value"),
            },
            Entry::Vacant(entry) => {
                let value = Arc::new(init());
                entry.insert(value.clone());
                value
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters shared by a root branch and every branch derived from it.
#[derive(Debug, Default)]
pub struct BranchStats {
    kernels: AtomicU64,
    derived_branches: AtomicU64,
    sweeps: AtomicU64,
    nodes_processed: AtomicU64,
}

/// Plain snapshot of [`BranchStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchStatsSnapshot {
    /// Kernels scheduled.
    pub kernels: u64,
    /// Derived branches created (Move-Origin, Grid-Scale).
    pub derived_branches: u64,
    /// Evaluator sweeps across all branches.
    pub sweeps: u64,
    /// Node instances that reached the processed state.
    pub nodes_processed: u64,
}

impl BranchStats {
    pub(crate) fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.nodes_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> BranchStatsSnapshot {
        BranchStatsSnapshot {
            kernels: self.kernels.load(Ordering::Relaxed),
            derived_branches: self.derived_branches.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            nodes_processed: self.nodes_processed.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// Evaluation context of one tile.
pub struct BranchData<'a> {
    graph: &'a FinalizedGraph,
    arena: &'a Arena,
    scheduler: &'a JobScheduler,
    stats: &'a BranchStats,
    parent: Option<&'a BranchData<'a>>,
    config: TerrainConfig,
    cache: BranchCache,
}

impl std::fmt::Debug for BranchData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchData")
            .field("config", &self.config)
            .field("depth", &self.depth())
            .field("cache", &self.cache)
            .finish()
    }
}

impl<'a> BranchData<'a> {
    /// Create a root branch.
    pub fn new(
        graph: &'a FinalizedGraph,
        arena: &'a Arena,
        scheduler: &'a JobScheduler,
        stats: &'a BranchStats,
        config: TerrainConfig,
    ) -> Self {
        Self {
            graph,
            arena,
            scheduler,
            stats,
            parent: None,
            config,
            cache: BranchCache::default(),
        }
    }

    /// Create a child branch with a different coordinate frame. It shares
    /// the arena, scheduler and stats, and must be dropped before `self`.
    pub fn derive(&self, config: TerrainConfig) -> BranchData<'_> {
        self.stats.derived_branches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            depth = self.depth() + 1,
            origin_x = config.origin.x,
            origin_y = config.origin.y,
            cell_size = config.cell_size,
            "derived branch"
        );
        BranchData {
            graph: self.graph,
            arena: self.arena,
            scheduler: self.scheduler,
            stats: self.stats,
            parent: Some(self),
            config,
            cache: BranchCache::default(),
        }
    }

    /// Graph being evaluated.
    pub fn graph(&self) -> &'a FinalizedGraph {
        self.graph
    }

    /// Terrain configuration of this branch.
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Output resolution of ordinary nodes.
    pub fn resolution(&self) -> u32 {
        self.config.resolution
    }

    /// Branch this one was derived from, if any.
    pub fn parent(&self) -> Option<&BranchData<'a>> {
        self.parent
    }

    /// Number of derivations between this branch and the root.
    pub fn depth(&self) -> usize {
        self.parent.map_or(0, |p| p.depth() + 1)
    }

    /// Branch-scoped memoization table.
    pub fn cache(&self) -> &BranchCache {
        &self.cache
    }

    /// Shared counters.
    pub fn stats(&self) -> &'a BranchStats {
        self.stats
    }

    /// Arena backing every region of this evaluation.
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Worker pool running the kernels.
    pub fn scheduler(&self) -> &'a JobScheduler {
        self.scheduler
    }

    /// World position of a flattened index at branch resolution.
    #[inline]
    pub fn world_position(&self, index: usize) -> DVec2 {
        self.config.world_position(index)
    }

    /// Allocate a region at branch resolution and schedule `kernel` over it
    /// once every input in `inputs` is written.
    ///
    /// Samples are stored as the kernel returns them; `range` must bound
    /// every one of them.
    pub fn schedule_kernel<K>(&self, inputs: &[&HeightData], range: ValueRange, kernel: K) -> HeightData
    where
        K: Fn(usize) -> f32 + Send + Sync + 'static,
    {
        self.schedule_kernel_at(self.config.resolution, inputs, range, kernel)
    }

    /// Like [`BranchData::schedule_kernel`] with an explicit resolution.
    pub fn schedule_kernel_at<K>(
        &self,
        resolution: u32,
        inputs: &[&HeightData],
        range: ValueRange,
        kernel: K,
    ) -> HeightData
    where
        K: Fn(usize) -> f32 + Send + Sync + 'static,
    {
        let dependencies: Vec<JobHandle> = inputs.iter().map(|d| d.task.clone()).collect();
        self.schedule_kernel_after(resolution, &dependencies, range, kernel)
    }

    /// Schedule a kernel after an explicit set of handles.
    pub fn schedule_kernel_after<K>(
        &self,
        resolution: u32,
        dependencies: &[JobHandle],
        range: ValueRange,
        kernel: K,
    ) -> HeightData
    where
        K: Fn(usize) -> f32 + Send + Sync + 'static,
    {
        let writer = self.arena.allocate(resolution);
        let (task, view) = self.scheduler.schedule_kernel(writer, dependencies, kernel);
        self.stats.kernels.fetch_add(1, Ordering::Relaxed);
        HeightData { task, view, range }
    }

    /// A 1×1 region holding `value`, declared with `range`.
    pub fn constant(&self, value: f32, range: ValueRange) -> HeightData {
        self.schedule_kernel_at(1, &[], range, move |_| value)
    }

    /// Handle completing once every input is written.
    pub fn combine(&self, inputs: &[&HeightData]) -> JobHandle {
        let handles: Vec<JobHandle> = inputs.iter().map(|d| d.task.clone()).collect();
        self.scheduler.combine(&handles)
    }

    /// Evaluate the subgraph feeding `source` in this branch and return the
    /// value it publishes.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors of the subgraph.
    pub fn evaluate_endpoint(&self, source: &Endpoint) -> Result<PortValue, EvalError> {
        let outputs = crate::evaluator::run(self, &[source.node])?;
        outputs.resolve(source)
    }

    /// [`BranchData::evaluate_endpoint`] for a single-valued port.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::UnexpectedValue`] if the port produced a list.
    pub fn evaluate_height(&self, source: &Endpoint) -> Result<HeightData, EvalError> {
        match self.evaluate_endpoint(source)? {
            PortValue::Height(data) => Ok(data),
            PortValue::List(_) => Err(EvalError::UnexpectedValue {
                node: source.node,
                port: source.port.clone(),
            }),
        }
    }
}
