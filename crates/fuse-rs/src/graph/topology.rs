use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::graph::arena::{ComputeGraph, NodeId};

/// Reported when the graph order cannot be made topological.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyError {
    /// Nodes that could not be scheduled because they sit on or behind a cycle.
    pub unscheduled: Vec<NodeId>,
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "graph contains a cycle; {} node(s) unscheduled",
            self.unscheduled.len()
        )?;
        if let Some(first) = self.unscheduled.first() {
            write!(f, " (first: {first})")?;
        }
        Ok(())
    }
}

impl std::error::Error for TopologyError {}

/// Computes a topological order over data and control edges.
///
/// Ready nodes are released by their position in the current graph order, so an already
/// topological order is returned unchanged and new nodes stay where they were inserted.
pub fn topological_order(graph: &ComputeGraph) -> Result<Vec<NodeId>, TopologyError> {
    let order = graph.node_ids();
    let rank: HashMap<NodeId, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();

    let mut indegree: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    let mut ready = BinaryHeap::new();
    for (pos, id) in order.iter().enumerate() {
        let count = graph.predecessors(*id).len();
        indegree.insert(*id, count);
        if count == 0 {
            ready.push(Reverse(pos));
        }
    }

    let mut sorted = Vec::with_capacity(order.len());
    while let Some(Reverse(pos)) = ready.pop() {
        let id = order[pos];
        sorted.push(id);
        for succ in graph.successors(id) {
            let Some(count) = indegree.get_mut(&succ) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                if let Some(succ_pos) = rank.get(&succ) {
                    ready.push(Reverse(*succ_pos));
                }
            }
        }
    }

    if sorted.len() != order.len() {
        let unscheduled = order
            .iter()
            .copied()
            .filter(|id| indegree.get(id).is_some_and(|count| *count > 0))
            .collect();
        return Err(TopologyError { unscheduled });
    }
    Ok(sorted)
}

/// Sorts the graph order topologically and assigns dense topological ids.
pub fn topological_sort(graph: &mut ComputeGraph) -> Result<(), TopologyError> {
    let sorted = topological_order(graph)?;
    graph.set_order(sorted);
    graph.renumber();
    Ok(())
}

/// Checks that every edge points forward in the current graph order.
pub fn validate_graph_topology(graph: &ComputeGraph) -> Result<(), TopologyError> {
    let rank: HashMap<NodeId, usize> = graph
        .node_ids()
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();
    let mut unscheduled = Vec::new();
    for id in graph.node_ids() {
        let pos = rank[id];
        let backwards = graph
            .successors(*id)
            .iter()
            .any(|succ| rank.get(succ).map_or(true, |succ_pos| *succ_pos <= pos));
        if backwards {
            unscheduled.push(*id);
        }
    }
    if unscheduled.is_empty() {
        Ok(())
    } else {
        Err(TopologyError { unscheduled })
    }
}
