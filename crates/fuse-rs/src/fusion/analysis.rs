use std::collections::{HashMap, HashSet};

use crate::graph::{topological_order, ComputeGraph, NodeId, OpDesc, TopologyError};
use crate::optimizer::FusionConfig;

use super::attrs;
use super::reachability::ConnectionMatrix;
use super::ScopeId;

/// Scope a node may be grouped under, or `None` when it never joins a scope.
///
/// Nodes without a non-negative scope id, below the configured lower bound, flagged
/// `no_task`, or already produced by an earlier splice are excluded.
pub fn eligible_scope(desc: &OpDesc, config: &FusionConfig) -> Option<ScopeId> {
    let scope = desc.i64_attr(attrs::SCOPE_ID)?;
    if scope < 0 || scope < config.scope_lower_bound {
        return None;
    }
    if desc.bool_attr(attrs::NO_TASK) == Some(true)
        || desc.bool_attr(attrs::IS_COMPILED_FUSION_OP) == Some(true)
    {
        return None;
    }
    Some(scope)
}

/// Answers whether merging a producer into a consumer's scope keeps the graph acyclic.
///
/// Built once per graph state. The analyzer also tracks which nodes have been absorbed
/// into each scope during grouping so later checks see the partially formed sets.
pub struct FusibilityAnalyzer<'g> {
    graph: &'g ComputeGraph,
    matrix: ConnectionMatrix,
    order: Vec<NodeId>,
    scopes: HashMap<NodeId, ScopeId>,
    scope_nodes: HashMap<ScopeId, Vec<NodeId>>,
    absorbed: HashMap<ScopeId, HashSet<NodeId>>,
}

impl<'g> FusibilityAnalyzer<'g> {
    pub fn new(graph: &'g ComputeGraph, config: &FusionConfig) -> Result<Self, TopologyError> {
        let order = topological_order(graph)?;
        let matrix = ConnectionMatrix::build(graph)?;
        let scopes: HashMap<NodeId, ScopeId> = order
            .iter()
            .filter_map(|id| {
                let desc = graph.desc(*id)?;
                eligible_scope(desc, config).map(|scope| (*id, scope))
            })
            .collect();
        let mut scope_nodes: HashMap<ScopeId, Vec<NodeId>> = HashMap::new();
        for id in &order {
            if let Some(scope) = scopes.get(id) {
                scope_nodes.entry(*scope).or_default().push(*id);
            }
        }
        Ok(Self {
            graph,
            matrix,
            order,
            scopes,
            scope_nodes,
            absorbed: HashMap::new(),
        })
    }

    pub fn graph(&self) -> &'g ComputeGraph {
        self.graph
    }

    pub fn matrix(&self) -> &ConnectionMatrix {
        &self.matrix
    }

    /// Topological order the analyzer was built over.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.get(&node).copied()
    }

    /// Nodes absorbed into `scope` so far.
    pub fn members(&self, scope: ScopeId) -> Option<&HashSet<NodeId>> {
        self.absorbed.get(&scope)
    }

    pub fn absorb(&mut self, node: NodeId, scope: ScopeId) {
        self.absorbed.entry(scope).or_default().insert(node);
    }

    /// Nodes that cannot join their own scope without creating a cycle.
    ///
    /// Visits nodes in reverse topological order so every consumer is decided before its
    /// producers. A node with same-scope successors is unfusible when one of its other
    /// successors leads back into the scope, or when some same-scope successor cannot absorb
    /// it on every path. Successors that never return to the scope only read a boundary
    /// output and do not count against the node.
    pub fn compute_unfusible_nodes(&self) -> HashSet<NodeId> {
        let mut unfusible = HashSet::new();
        let mut memo = HashMap::new();

        for &node in self.order.iter().rev() {
            let Some(scope) = self.scope_of(node) else {
                continue;
            };
            let successors = self.graph.data_successors(node);
            let same_scope: Vec<NodeId> = successors
                .iter()
                .copied()
                .filter(|succ| self.scope_of(*succ) == Some(scope))
                .collect();
            if same_scope.is_empty() {
                continue;
            }
            if let Some(outside) = self.returning_successor(&successors, scope) {
                log::debug!(
                    "{} (scope {scope}) feeds {} which leads back into the scope; marking unfusible",
                    self.describe(node),
                    self.describe(outside)
                );
                unfusible.insert(node);
                continue;
            }
            for succ in same_scope {
                if !self.able_to_fuse_on_all_paths(node, succ, &unfusible, &mut memo) {
                    log::debug!(
                        "{} cannot fold into {} on every path; marking unfusible",
                        self.describe(node),
                        self.describe(succ)
                    );
                    unfusible.insert(node);
                    break;
                }
            }
        }

        unfusible
    }

    /// Checks that every path `producer -> ... -> consumer` runs through nodes that can be
    /// fused together with both endpoints.
    ///
    /// Walks the consumer's predecessors that the producer reaches. Each must share the
    /// consumer's scope, not be unfusible, and recursively satisfy the same condition.
    /// Results are memoized per `(producer, consumer)` pair.
    pub fn able_to_fuse_on_all_paths(
        &self,
        producer: NodeId,
        consumer: NodeId,
        unfusible: &HashSet<NodeId>,
        memo: &mut HashMap<(NodeId, NodeId), bool>,
    ) -> bool {
        if producer == consumer {
            return true;
        }
        if let Some(cached) = memo.get(&(producer, consumer)) {
            return *cached;
        }
        let result = self.fuse_on_all_paths_uncached(producer, consumer, unfusible, memo);
        memo.insert((producer, consumer), result);
        result
    }

    fn fuse_on_all_paths_uncached(
        &self,
        producer: NodeId,
        consumer: NodeId,
        unfusible: &HashSet<NodeId>,
        memo: &mut HashMap<(NodeId, NodeId), bool>,
    ) -> bool {
        let Some(scope) = self.scope_of(consumer) else {
            return false;
        };
        for pred in self.graph.predecessors(consumer) {
            if pred == producer || !self.matrix.reachable(producer, pred) {
                continue;
            }
            if unfusible.contains(&pred) || self.scope_of(pred) != Some(scope) {
                return false;
            }
            if !self.able_to_fuse_on_all_paths(producer, pred, unfusible, memo) {
                return false;
            }
        }
        true
    }

    /// Returns `true` when folding `producer` into the set absorbed for `consumer_scope`
    /// would close a cycle through nodes outside the set.
    ///
    /// `consumer` must already be absorbed; it anchors the set the producer joins. Folds
    /// across scope ids and folds of unfusible producers are always rejected.
    pub fn check_loop_exist_after_fusion(
        &self,
        producer: NodeId,
        consumer: NodeId,
        producer_scope: ScopeId,
        consumer_scope: ScopeId,
        unfusible: &HashSet<NodeId>,
    ) -> bool {
        if producer_scope != consumer_scope || unfusible.contains(&producer) {
            return true;
        }
        let Some(members) = self.absorbed.get(&consumer_scope) else {
            return true;
        };
        if !members.contains(&consumer) {
            log::debug!(
                "{} is not part of scope {consumer_scope}; refusing fold of {}",
                self.describe(consumer),
                self.describe(producer)
            );
            return true;
        }

        self.graph
            .successors(producer)
            .into_iter()
            .filter(|succ| !members.contains(succ))
            .any(|succ| self.matrix.reaches_any(succ, members.iter()))
    }

    /// First successor outside `scope` that reaches a node of `scope`.
    fn returning_successor(&self, successors: &[NodeId], scope: ScopeId) -> Option<NodeId> {
        let members = self.scope_nodes.get(&scope)?;
        successors
            .iter()
            .copied()
            .filter(|succ| self.scope_of(*succ) != Some(scope))
            .find(|succ| self.matrix.reaches_any(*succ, members.iter()))
    }

    fn describe(&self, node: NodeId) -> String {
        match self.graph.node(node) {
            Some(n) => format!("`{}` ({node})", n.name()),
            None => node.to_string(),
        }
    }
}
