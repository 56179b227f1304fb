use std::collections::HashMap;

use thiserror::Error;

use crate::graph::{GraphError, InPort, NodeId, OutPort, TopologyError};
use crate::kernel::RegistryError;

pub type ScopeId = i64;

/// A validated set of nodes to merge, in graph order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionScope {
    pub id: ScopeId,
    pub nodes: Vec<NodeId>,
}

/// Edge entering the scope; becomes fused input `fused_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryInput {
    pub src: OutPort,
    /// Producer name, kept so provenance survives later deletion of the producer.
    pub src_name: String,
    pub dst: InPort,
    pub fused_index: usize,
}

/// Constituent output read outside the scope; becomes fused output `fused_index`.
///
/// All external consumers of one output anchor share one slot. `dsts` is empty for an
/// output nobody consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryOutput {
    pub src: OutPort,
    pub dsts: Vec<InPort>,
    pub dst_names: Vec<String>,
    pub fused_index: usize,
}

/// Boundary data edges of a scope plus the port → fused index side maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionEdgeList {
    pub inputs: Vec<BoundaryInput>,
    pub outputs: Vec<BoundaryOutput>,
    pub(crate) input_index_of: HashMap<InPort, usize>,
    pub(crate) output_index_of: HashMap<OutPort, usize>,
    /// Data edges with both endpoints inside the scope.
    pub internal_edges: usize,
}

impl FusionEdgeList {
    /// Fused input index behind a constituent input port, if that port is on the boundary.
    pub fn input_index(&self, port: InPort) -> Option<usize> {
        self.input_index_of.get(&port).copied()
    }

    /// Fused output index behind a constituent output port, if that port is on the boundary.
    pub fn output_index(&self, port: OutPort) -> Option<usize> {
        self.output_index_of.get(&port).copied()
    }

    /// Number of boundary data edges: one per input slot plus one per external consumer.
    pub fn boundary_edge_count(&self) -> usize {
        self.inputs.len()
            + self
                .outputs
                .iter()
                .map(|output| output.dsts.len())
                .sum::<usize>()
    }
}

/// Boundary control edges as `(src, dst)` pairs; internal control edges are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionCtrlEdgeList {
    /// External source → constituent.
    pub in_edges: Vec<(NodeId, NodeId)>,
    /// Constituent → external destination.
    pub out_edges: Vec<(NodeId, NodeId)>,
    pub internal_edges: usize,
}

impl FusionCtrlEdgeList {
    /// External control predecessors, first occurrence order.
    pub fn external_sources(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for (src, _) in &self.in_edges {
            if !out.contains(src) {
                out.push(*src);
            }
        }
        out
    }

    /// External control successors, first occurrence order.
    pub fn external_targets(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for (_, dst) in &self.out_edges {
            if !out.contains(dst) {
                out.push(*dst);
            }
        }
        out
    }
}

/// Failures while merging one scope.
///
/// Everything except [`FusionError::is_fatal`] variants is local to the scope being merged:
/// the pass reports it and moves on, leaving that scope's nodes unfused.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("fusion scope has no constituent nodes")]
    EmptyScope,
    #[error("node {node} referenced while {context} no longer exists")]
    StaleNode { node: NodeId, context: &'static str },
    #[error("no constituent of `{fused_name}` carries `imply_type`")]
    MissingImplyType { fused_name: String },
    #[error("primary constituent `{node_name}` lacks required kernel metadata `{attr}`")]
    MissingKernelMeta {
        node_name: String,
        attr: &'static str,
    },
    #[error("kernel payload relocation for `{fused_name}` failed: {source}")]
    KernelPayload {
        fused_name: String,
        #[source]
        source: RegistryError,
    },
    #[error("slice info serialization failed: {0}")]
    SliceInfo(#[from] serde_json::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("input graph is not acyclic: {0}")]
    CyclicInput(#[source] TopologyError),
    #[error("graph edit failed after inserting fused node `{fused_name}`: {source}")]
    Commit {
        fused_name: String,
        #[source]
        source: GraphError,
    },
    #[error("topological sort failed after splicing `{fused_name}`: {source}")]
    CycleAfterSplice {
        fused_name: String,
        #[source]
        source: TopologyError,
    },
}

impl FusionError {
    /// Fatal errors leave the graph in a state the rest of the compile cannot use.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FusionError::CyclicInput(_)
                | FusionError::Commit { .. }
                | FusionError::CycleAfterSplice { .. }
        )
    }
}
