//! Sample arena: a growable store of `f32` samples handing out square,
//! non-overlapping regions.
//!
//! Regions are addressed by an [`IndexAndResolution`] whose start index is
//! global to the arena. The store grows by appending backing chunks, so live
//! regions never move while kernels are writing or reading them.
//!
//! The single-writer rule is carried by the types: [`Arena::allocate`] returns
//! a [`RegionWriter`], which is not `Clone` and is consumed by the scheduler in
//! exchange for a read-only [`RegionView`].
//!
//! ```compile_fail
//! use nebula_heightgraph::Arena;
//!
//! let arena = Arena::new(64);
//! let writer = arena.allocate(4);
//! let second = writer.clone(); // a write capability cannot be duplicated
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::remap::remap_index;

/// Location and shape of a region inside the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexAndResolution {
    /// Global index of the first sample.
    pub start_index: usize,
    /// Side length of the square grid.
    pub resolution: u32,
    /// Number of samples, always `resolution²`.
    pub length: usize,
}

impl IndexAndResolution {
    /// Describe a region of `resolution²` samples starting at `start_index`.
    pub fn new(start_index: usize, resolution: u32) -> Self {
        let r = resolution as usize;
        Self {
            start_index,
            resolution,
            length: r * r,
        }
    }

    /// One past the last global index of the region.
    pub fn end_index(&self) -> usize {
        self.start_index + self.length
    }

    /// Returns `true` if the two regions share at least one index.
    pub fn overlaps(&self, other: &IndexAndResolution) -> bool {
        self.start_index < other.end_index() && other.start_index < self.end_index()
    }
}

/// One backing allocation. Samples are stored as `f32` bit patterns so that
/// disjoint writers on different threads need no locking.
#[derive(Debug)]
struct ArenaChunk {
    samples: Box<[AtomicU32]>,
}

impl ArenaChunk {
    fn with_len(len: usize) -> Self {
        Self {
            samples: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

/// Shared handle to the samples of one region.
#[derive(Clone, Debug)]
struct RegionStorage {
    chunk: Arc<ArenaChunk>,
    offset: usize,
}

impl RegionStorage {
    #[inline]
    fn load(&self, local: usize) -> f32 {
        f32::from_bits(self.chunk.samples[self.offset + local].load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, local: usize, value: f32) {
        self.chunk.samples[self.offset + local].store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct ArenaState {
    chunks: Vec<Arc<ArenaChunk>>,
    /// Next global start index.
    cursor: usize,
    /// Samples used in the last chunk.
    chunk_used: usize,
    regions: usize,
}

/// Growable sample store shared by every branch of one evaluation.
///
/// There is no per-region free: [`Arena::release`] drops everything at once
/// when the evaluation is torn down.
#[derive(Debug)]
pub struct Arena {
    state: Mutex<ArenaState>,
    chunk_capacity: usize,
}

impl Arena {
    /// Create an empty arena whose backing chunks hold at least
    /// `chunk_capacity` samples each.
    pub fn new(chunk_capacity: usize) -> Self {
        Self {
            state: Mutex::new(ArenaState::default()),
            chunk_capacity: chunk_capacity.max(1),
        }
    }

    /// Reserve `resolution²` contiguous samples.
    ///
    /// A resolution of zero is treated as one.
    pub fn allocate(&self, resolution: u32) -> RegionWriter {
        let resolution = resolution.max(1);
        let region_len = (resolution as usize) * (resolution as usize);

        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let reusable = match state.chunks.last() {
            Some(chunk) if state.chunk_used + region_len <= chunk.samples.len() => {
                Some(Arc::clone(chunk))
            }
            _ => None,
        };
        let chunk = match reusable {
            Some(chunk) => chunk,
            None => {
                let chunk = Arc::new(ArenaChunk::with_len(self.chunk_capacity.max(region_len)));
                state.chunks.push(Arc::clone(&chunk));
                state.chunk_used = 0;
                chunk
            }
        };

        let region = IndexAndResolution::new(state.cursor, resolution);
        let offset = state.chunk_used;
        state.cursor += region_len;
        state.chunk_used += region_len;
        state.regions += 1;

        RegionWriter {
            region,
            storage: RegionStorage { chunk, offset },
        }
    }

    /// Total number of samples handed out since creation or the last release.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cursor
    }

    /// Returns `true` if no region has been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples held by the backing chunks.
    pub fn capacity(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunks
            .iter()
            .map(|c| c.samples.len())
            .sum()
    }

    /// Number of regions allocated.
    pub fn region_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
    }

    /// Reclaim the whole arena.
    ///
    /// Views that are still held elsewhere keep their own chunk alive, so
    /// releasing never invalidates a published buffer.
    pub fn release(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let freed = state.cursor;
        *state = ArenaState::default();
        tracing::debug!(freed, "arena released");
    }
}

/// Exclusive write capability for one freshly allocated region.
///
/// Only the scheduler can turn it into a [`RegionView`]; the kernel it runs
/// is the single writer of the region.
#[derive(Debug)]
pub struct RegionWriter {
    region: IndexAndResolution,
    storage: RegionStorage,
}

impl RegionWriter {
    /// Shape and position of the region being written.
    pub fn region(&self) -> IndexAndResolution {
        self.region
    }

    /// Split into the batch sinks used by scheduled jobs and the view handed
    /// to readers.
    pub(crate) fn into_parts(self) -> (RegionSink, RegionView) {
        let sink = RegionSink {
            storage: self.storage.clone(),
        };
        let view = RegionView {
            region: self.region,
            storage: self.storage,
        };
        (sink, view)
    }
}

/// Write access shared by the batch jobs of a single kernel. Each batch
/// writes a disjoint index range.
#[derive(Clone, Debug)]
pub(crate) struct RegionSink {
    storage: RegionStorage,
}

impl RegionSink {
    #[inline]
    pub(crate) fn store(&self, local: usize, value: f32) {
        self.storage.store(local, value);
    }
}

/// Read-only view of a region.
///
/// Reading is only meaningful after the job that wrote the region has
/// completed; kernels get that guarantee from their dependency list, external
/// consumers from [`crate::HeightData::samples`].
#[derive(Clone, Debug)]
pub struct RegionView {
    region: IndexAndResolution,
    storage: RegionStorage,
}

impl RegionView {
    /// Shape and position of the region.
    pub fn region(&self) -> IndexAndResolution {
        self.region
    }

    /// Grid resolution of the region.
    pub fn resolution(&self) -> u32 {
        self.region.resolution
    }

    /// Sample at a local index of this region.
    #[inline]
    pub fn get(&self, local: usize) -> f32 {
        self.storage.load(local)
    }

    /// Sample covering `target_index` of a `target_resolution²` grid.
    #[inline]
    pub fn sample(&self, target_index: usize, target_resolution: u32) -> f32 {
        self.get(remap_index(
            target_index,
            target_resolution,
            self.region.resolution,
        ))
    }

    /// Copy every sample out, row-major.
    pub fn to_vec(&self) -> Vec<f32> {
        (0..self.region.length).map(|i| self.get(i)).collect()
    }
}
