//! Pass infrastructure shared by graph rewrites.

mod context;

pub use context::{FusionConfig, FusionContext, FusionServices};

use crate::fusion::FusionError;
use crate::graph::ComputeGraph;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Scopes merged into a single fused node.
    pub scopes_fused: usize,
    /// Scopes whose splice was attempted and failed; their nodes stay unfused.
    pub scopes_failed: usize,
    /// Constituent nodes removed from the graph.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            scopes_fused: self.scopes_fused + other.scopes_fused,
            scopes_failed: self.scopes_failed + other.scopes_failed,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

/// Interface implemented by passes that rewrite a whole compute graph in place.
///
/// `Err` is reserved for failures that leave the graph unusable; recoverable per-scope
/// failures are reported through [`PassResult`].
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(
        &self,
        graph: &mut ComputeGraph,
        cx: &mut FusionContext,
    ) -> Result<PassResult, FusionError>;
}
