//! Subgraph fusion for device-kernel compute graphs.
//!
//! An upstream pattern matcher tags nodes with a `fusion_scope` id. [`fuse_graph`] collapses
//! every scope into a single fused node while keeping the graph acyclic and every boundary
//! edge intact.

mod env;
pub mod fusion;
pub mod graph;
pub mod kernel;
pub mod optimizer;
pub mod passes;

pub use fusion::{FusionError, FusionScope, ScopeId};
pub use graph::{ComputeGraph, NodeId, OpDesc};
pub use optimizer::{FusionConfig, FusionContext, FusionServices, GraphPass, PassResult};
pub use passes::{fuse_graph, ScopeFusionPass};
