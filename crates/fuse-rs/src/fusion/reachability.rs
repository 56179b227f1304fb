use std::collections::HashMap;

use crate::graph::{topological_order, ComputeGraph, NodeId, TopologyError};

/// Transitive reachability over data and control edges, one ancestor bitset per node.
///
/// Only valid for the graph state it was built from; rebuild after every splice.
#[derive(Debug, Clone)]
pub struct ConnectionMatrix {
    index: HashMap<NodeId, usize>,
    ancestors: Vec<Vec<u64>>,
}

impl ConnectionMatrix {
    pub fn build(graph: &ComputeGraph) -> Result<Self, TopologyError> {
        let order = topological_order(graph)?;
        let index: HashMap<NodeId, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect();
        let words = order.len().div_ceil(64);
        let mut ancestors = vec![vec![0u64; words]; order.len()];

        for (pos, id) in order.iter().enumerate() {
            let mut row = vec![0u64; words];
            set_bit(&mut row, pos);
            for pred in graph.predecessors(*id) {
                let Some(&pred_pos) = index.get(&pred) else {
                    continue;
                };
                // Predecessors come earlier in the order, so their rows are final.
                for (dst, src) in row.iter_mut().zip(&ancestors[pred_pos]) {
                    *dst |= *src;
                }
            }
            ancestors[pos] = row;
        }

        Ok(Self { index, ancestors })
    }

    /// Returns `true` when a path `from -> ... -> to` exists. A node reaches itself.
    pub fn reachable(&self, from: NodeId, to: NodeId) -> bool {
        let (Some(&src), Some(&dst)) = (self.index.get(&from), self.index.get(&to)) else {
            return false;
        };
        test_bit(&self.ancestors[dst], src)
    }

    /// Returns `true` when `from` reaches any node in `targets`.
    pub fn reaches_any<'a>(
        &self,
        from: NodeId,
        targets: impl IntoIterator<Item = &'a NodeId>,
    ) -> bool {
        targets
            .into_iter()
            .any(|target| self.reachable(from, *target))
    }

    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }
}

fn set_bit(row: &mut [u64], pos: usize) {
    row[pos / 64] |= 1u64 << (pos % 64);
}

fn test_bit(row: &[u64], pos: usize) -> bool {
    row[pos / 64] & (1u64 << (pos % 64)) != 0
}
