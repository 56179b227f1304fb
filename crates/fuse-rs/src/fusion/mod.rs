//! Scope fusion: merges every node sharing a fusion scope id into one fused node.
//!
//! The stages run in order: [`select_scopes`] groups and validates candidate nodes,
//! [`get_fusion_node_edge_list`] classifies boundary edges, [`synthesize`] builds the fused
//! descriptor and [`splice_scope`] commits the rewrite.

mod analysis;
pub mod attrs;
mod edges;
mod ir;
pub mod policy;
mod propagate;
mod reachability;
mod rewrite;
mod select;
mod synth;

pub use analysis::{eligible_scope, FusibilityAnalyzer};
pub use edges::{get_fusion_node_ctrl_edge_list, get_fusion_node_edge_list};
pub use ir::{
    BoundaryInput, BoundaryOutput, FusionCtrlEdgeList, FusionEdgeList, FusionError,
    FusionScope, ScopeId,
};
pub use policy::{merge_attrs, policy_for, MergePolicy};
pub use propagate::{
    datadump_origins, inplace_aliases, ref_port_indices, strided_port_sizes, tensor_origins,
    write_inplace_aliases,
};
pub use reachability::ConnectionMatrix;
pub use rewrite::{commit_splice, plan_splice, splice_scope, SpliceOutcome, SplicePlan};
pub use select::{select_scopes, ScopeNodeMap, ScopeSelection};
pub use synth::{
    fused_node_name, release_fused_kernels, release_kernels, synthesize, FusedDescriptor,
};
