use std::collections::BTreeSet;

use anyhow::Context;

use crate::fusion::{select_scopes, splice_scope, FusionError, ScopeId};
use crate::graph::{topological_sort, ComputeGraph};
use crate::optimizer::{FusionContext, GraphPass, PassResult};

/// Collapses every validated fusion scope into a single node.
///
/// Scopes are revalidated against the current graph before each splice, since merging one
/// scope can open a path between members of another. A scope that fails to synthesize is
/// recorded in the context and left unfused; the pass continues with the next one. Failures
/// recorded by an earlier run are cleared first, since scope ids are local to one graph.
#[derive(Debug, Default)]
pub struct ScopeFusionPass;

impl ScopeFusionPass {
    const NAME: &'static str = "scope_fusion";
}

impl GraphPass for ScopeFusionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        graph: &mut ComputeGraph,
        cx: &mut FusionContext,
    ) -> Result<PassResult, FusionError> {
        cx.clear_failed_scopes();
        topological_sort(graph).map_err(FusionError::CyclicInput)?;

        let mut result = PassResult::default();
        let mut attempted: BTreeSet<ScopeId> = BTreeSet::new();
        loop {
            let selection = select_scopes(graph, cx.config()).map_err(FusionError::CyclicInput)?;
            let next = selection
                .scopes
                .scope_ids()
                .find(|scope| !attempted.contains(scope));
            let Some(scope) = next.and_then(|id| selection.scopes.scope(id)) else {
                break;
            };
            attempted.insert(scope.id);

            match splice_scope(graph, &scope, cx) {
                Ok(outcome) => {
                    log::debug!(
                        "scope {}: fused {} node(s) into `{}`",
                        outcome.scope,
                        outcome.erased.len(),
                        outcome.fused_name
                    );
                    result = result.merge(PassResult {
                        changed: true,
                        scopes_fused: 1,
                        scopes_failed: 0,
                        erased_nodes: outcome.erased.len(),
                    });
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("scope {}: fusion skipped: {err}", scope.id);
                    cx.record_failed_scope(scope.id);
                    result.scopes_failed += 1;
                }
            }
        }

        Ok(result)
    }
}

/// Runs [`ScopeFusionPass`] over `graph` and logs a summary.
pub fn fuse_graph(
    graph: &mut ComputeGraph,
    cx: &mut FusionContext,
) -> anyhow::Result<PassResult> {
    let name = graph.name().to_string();
    let before = graph.len();
    let result = ScopeFusionPass
        .run(graph, cx)
        .with_context(|| format!("scope fusion failed for graph `{name}`"))?;
    log::info!(
        "graph `{name}`: fused {} scope(s), {} failed, {} -> {} nodes",
        result.scopes_fused,
        result.scopes_failed,
        before,
        graph.len()
    );
    Ok(result)
}
