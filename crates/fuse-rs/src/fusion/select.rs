use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::graph::{ComputeGraph, NodeId, TopologyError};
use crate::optimizer::FusionConfig;

use super::analysis::{eligible_scope, FusibilityAnalyzer};
use super::{FusionScope, ScopeId};

/// Candidate nodes grouped by scope id; each list is in graph order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeNodeMap {
    scopes: BTreeMap<ScopeId, Vec<NodeId>>,
}

impl ScopeNodeMap {
    /// Groups every eligible node by its scope id without any cycle checks.
    pub fn collect(graph: &ComputeGraph, config: &FusionConfig) -> Self {
        let mut scopes: BTreeMap<ScopeId, Vec<NodeId>> = BTreeMap::new();
        for id in graph.node_ids() {
            let Some(desc) = graph.desc(*id) else {
                continue;
            };
            if let Some(scope) = eligible_scope(desc, config) {
                scopes.entry(scope).or_default().push(*id);
            }
        }
        Self { scopes }
    }

    pub fn get(&self, scope: ScopeId) -> Option<&[NodeId]> {
        self.scopes.get(&scope).map(Vec::as_slice)
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.scopes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &[NodeId])> + '_ {
        self.scopes
            .iter()
            .map(|(scope, nodes)| (*scope, nodes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Materializes one scope as a [`FusionScope`].
    pub fn scope(&self, scope: ScopeId) -> Option<FusionScope> {
        self.scopes.get(&scope).map(|nodes| FusionScope {
            id: scope,
            nodes: nodes.clone(),
        })
    }

    fn insert(&mut self, scope: ScopeId, nodes: Vec<NodeId>) {
        self.scopes.insert(scope, nodes);
    }
}

/// Outcome of validating every scope against the current graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeSelection {
    /// Validated scopes that are large enough to merge.
    pub scopes: ScopeNodeMap,
    pub unfusible: BTreeSet<NodeId>,
    /// Producers left out because folding them would close a cycle.
    pub rejected_loop: Vec<NodeId>,
    /// Scopes dropped for falling under the minimum size after validation.
    pub dropped_small: Vec<ScopeId>,
}

/// Groups candidate nodes by scope and removes every node whose inclusion would create a
/// cycle once its scope is collapsed into one node.
///
/// Unfusible nodes are dropped first. Each scope is then grown from its last node in
/// topological order towards its producers; a producer joins only when no path leaves the
/// set and re-enters it.
pub fn select_scopes(
    graph: &ComputeGraph,
    config: &FusionConfig,
) -> Result<ScopeSelection, TopologyError> {
    let grouped = ScopeNodeMap::collect(graph, config);
    let mut analyzer = FusibilityAnalyzer::new(graph, config)?;
    let unfusible = analyzer.compute_unfusible_nodes();

    let rank: HashMap<NodeId, usize> = analyzer
        .order()
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();

    let mut selection = ScopeSelection {
        unfusible: unfusible.iter().copied().collect(),
        ..ScopeSelection::default()
    };

    for (scope, nodes) in grouped.iter() {
        let mut candidates: Vec<NodeId> = nodes
            .iter()
            .copied()
            .filter(|id| !unfusible.contains(id))
            .collect();
        candidates.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));

        let mut anchor: Option<NodeId> = None;
        for &producer in candidates.iter().rev() {
            let Some(seed) = anchor else {
                analyzer.absorb(producer, scope);
                anchor = Some(producer);
                continue;
            };
            let consumer = adjacent_member(&analyzer, producer, scope).unwrap_or(seed);
            let loops =
                analyzer.check_loop_exist_after_fusion(producer, consumer, scope, scope, &unfusible);
            if loops {
                log::debug!("scope {scope}: leaving {producer} out to avoid a cycle");
                selection.rejected_loop.push(producer);
                continue;
            }
            analyzer.absorb(producer, scope);
        }

        let members: HashSet<NodeId> = analyzer.members(scope).cloned().unwrap_or_default();
        let ordered: Vec<NodeId> = candidates
            .into_iter()
            .filter(|id| members.contains(id))
            .collect();
        if ordered.len() < config.min_scope_size.max(1) {
            log::debug!(
                "scope {scope}: {} node(s) after validation, below minimum {}",
                ordered.len(),
                config.min_scope_size
            );
            selection.dropped_small.push(scope);
            continue;
        }
        selection.scopes.insert(scope, ordered);
    }

    Ok(selection)
}

/// First data successor of `producer` already absorbed into `scope`.
fn adjacent_member(
    analyzer: &FusibilityAnalyzer<'_>,
    producer: NodeId,
    scope: ScopeId,
) -> Option<NodeId> {
    let members = analyzer.members(scope)?;
    analyzer
        .graph()
        .data_successors(producer)
        .into_iter()
        .find(|succ| members.contains(succ))
}
