//! Procedural heightmap graph engine: a dataflow graph of operator nodes
//! evaluated per terrain tile into height and weight buffers.
//!
//! A [`Graph`] is built in code or loaded from a [`GraphDesc`], then
//! [`Graph::finalize`]d (validated, amplified, frozen). A
//! [`HeightGraphEngine`] evaluates the finalized graph for a
//! [`TerrainConfig`]; nodes schedule data-parallel kernels over arena regions
//! on a shared worker pool and hand each other [`HeightData`] futures.

mod arena;
mod branch;
mod engine;
mod error;
mod evaluator;
mod height_data;
mod heightmap;
mod remap;
mod scheduler;

pub mod debug_viz;
pub mod graph;
pub mod node;
pub mod nodes;

pub use arena::{Arena, IndexAndResolution, RegionView, RegionWriter};
pub use branch::{BranchCache, BranchData, BranchStats, BranchStatsSnapshot, TerrainConfig};
pub use engine::{BranchOutputs, EngineConfig, HeightGraphEngine};
pub use error::{EvalError, GraphError};
pub use graph::{
    Edge, EdgeDesc, Endpoint, EndpointDesc, FinalizedGraph, Graph, GraphDesc, NodeDesc, NodeId,
    TreeKind,
};
pub use height_data::{HeightData, ValueRange};
pub use heightmap::{FbmParams, FbmSampler};
pub use node::{Node, NodeInstance, PortDescriptor, PortDirection, PortType, PortValue};
pub use nodes::NodeKind;
pub use remap::remap_index;
pub use scheduler::{JobHandle, JobScheduler, SchedulerConfig};
