//! Node arena for compute graphs.
//!
//! Nodes are stored in slots indexed by [`NodeId`]. Slots are never reused, so an id held
//! across a mutation either still names the same node or reports [`GraphError::DeadNode`].
//! The graph keeps an explicit node order which the topology module keeps topological.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::graph::spec::OpDesc;

/// Stable arena identifier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Data output anchor: `(node, output index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct OutPort {
    pub node: NodeId,
    pub index: usize,
}

impl OutPort {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for OutPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:out{}", self.node, self.index)
    }
}

/// Data input anchor: `(node, input index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct InPort {
    pub node: NodeId,
    pub index: usize,
}

impl InPort {
    pub fn new(node: NodeId, index: usize) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for InPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:in{}", self.node, self.index)
    }
}

/// A graph vertex: its descriptor plus the anchors linking it to peers.
///
/// Port counts are fixed when the node is added; editing `desc.inputs`/`desc.outputs`
/// lengths afterwards is not supported.
#[derive(Debug, Clone)]
pub struct Node {
    pub desc: OpDesc,
    topo_id: u32,
    in_edges: Vec<Option<OutPort>>,
    out_edges: Vec<SmallVec<[InPort; 4]>>,
    ctrl_in: SmallVec<[NodeId; 2]>,
    ctrl_out: SmallVec<[NodeId; 2]>,
}

impl Node {
    fn new(desc: OpDesc, topo_id: u32) -> Self {
        let in_edges = vec![None; desc.inputs.len()];
        let out_edges = vec![SmallVec::new(); desc.outputs.len()];
        Self {
            desc,
            topo_id,
            in_edges,
            out_edges,
            ctrl_in: SmallVec::new(),
            ctrl_out: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn op_type(&self) -> &str {
        &self.desc.op_type
    }

    /// Dense topological position assigned by the last renumbering.
    pub fn topo_id(&self) -> u32 {
        self.topo_id
    }

    pub fn input_count(&self) -> usize {
        self.in_edges.len()
    }

    pub fn output_count(&self) -> usize {
        self.out_edges.len()
    }

    /// Producer feeding input `index`, if connected.
    pub fn producer(&self, index: usize) -> Option<OutPort> {
        self.in_edges.get(index).copied().flatten()
    }

    /// Consumers of output `index` in edge insertion order.
    pub fn consumers(&self, index: usize) -> &[InPort] {
        self.out_edges
            .get(index)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn ctrl_in(&self) -> &[NodeId] {
        &self.ctrl_in
    }

    pub fn ctrl_out(&self) -> &[NodeId] {
        &self.ctrl_out
    }
}

/// Errors surfaced by structural graph edits and lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {node} does not exist or was removed")]
    DeadNode { node: NodeId },
    #[error("input index {index} out of range for node {node} with {count} inputs")]
    InputOutOfRange {
        node: NodeId,
        index: usize,
        count: usize,
    },
    #[error("output index {index} out of range for node {node} with {count} outputs")]
    OutputOutOfRange {
        node: NodeId,
        index: usize,
        count: usize,
    },
    #[error("input {port} already has a producer")]
    InputAlreadyConnected { port: InPort },
    #[error("no data edge {src} -> {dst}")]
    MissingEdge { src: OutPort, dst: InPort },
    #[error("control edge from {node} to itself")]
    SelfLoop { node: NodeId },
}

/// Dataflow graph of device-kernel operations.
#[derive(Debug, Clone, Default)]
pub struct ComputeGraph {
    name: String,
    nodes: Vec<Option<Node>>,
    order: Vec<NodeId>,
}

impl ComputeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Live node ids in graph order (topological after a sort).
    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Appends a node at the end of the graph order.
    pub fn add_node(&mut self, desc: OpDesc) -> NodeId {
        let id = self.allocate(desc);
        self.order.push(id);
        id
    }

    /// Adds a node placed immediately before `anchor` in the graph order.
    pub fn insert_node_before(
        &mut self,
        desc: OpDesc,
        anchor: NodeId,
    ) -> Result<NodeId, GraphError> {
        let pos = self
            .position(anchor)
            .ok_or(GraphError::DeadNode { node: anchor })?;
        let id = self.allocate(desc);
        self.order.insert(pos, id);
        Ok(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Like [`ComputeGraph::node`] but reports a dead id as an error.
    pub fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::DeadNode { node: id })
    }

    pub fn desc(&self, id: NodeId) -> Option<&OpDesc> {
        self.node(id).map(|node| &node.desc)
    }

    pub fn desc_mut(&mut self, id: NodeId) -> Option<&mut OpDesc> {
        self.node_mut(id).map(|node| &mut node.desc)
    }

    /// First live node carrying `name`, in graph order.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.node(*id).is_some_and(|node| node.name() == name))
    }

    /// Position of `id` within the graph order.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        self.order.iter().position(|candidate| *candidate == id)
    }

    pub fn producer(&self, port: InPort) -> Option<OutPort> {
        self.node(port.node)?.producer(port.index)
    }

    pub fn consumers(&self, port: OutPort) -> &[InPort] {
        self.node(port.node)
            .map(|node| node.consumers(port.index))
            .unwrap_or(&[])
    }

    /// Connects a data output to a data input.
    pub fn add_data_edge(&mut self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        let src_node = self.try_node(src.node)?;
        if src.index >= src_node.output_count() {
            return Err(GraphError::OutputOutOfRange {
                node: src.node,
                index: src.index,
                count: src_node.output_count(),
            });
        }
        let dst_node = self.try_node(dst.node)?;
        if dst.index >= dst_node.input_count() {
            return Err(GraphError::InputOutOfRange {
                node: dst.node,
                index: dst.index,
                count: dst_node.input_count(),
            });
        }
        if dst_node.producer(dst.index).is_some() {
            return Err(GraphError::InputAlreadyConnected { port: dst });
        }

        if let Some(node) = self.node_mut(dst.node) {
            node.in_edges[dst.index] = Some(src);
        }
        if let Some(node) = self.node_mut(src.node) {
            node.out_edges[src.index].push(dst);
        }
        Ok(())
    }

    /// Removes the data edge `src -> dst`.
    pub fn remove_data_edge(&mut self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        if self.producer(dst) != Some(src) {
            return Err(GraphError::MissingEdge { src, dst });
        }
        if let Some(node) = self.node_mut(dst.node) {
            node.in_edges[dst.index] = None;
        }
        if let Some(node) = self.node_mut(src.node) {
            if let Some(list) = node.out_edges.get_mut(src.index) {
                list.retain(|port| *port != dst);
            }
        }
        Ok(())
    }

    /// Adds a control edge. Adding an existing edge is a no-op.
    pub fn add_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        if src == dst {
            return Err(GraphError::SelfLoop { node: src });
        }
        self.try_node(dst)?;
        let src_node = self.try_node(src)?;
        if src_node.ctrl_out.contains(&dst) {
            return Ok(());
        }
        if let Some(node) = self.node_mut(src) {
            node.ctrl_out.push(dst);
        }
        if let Some(node) = self.node_mut(dst) {
            node.ctrl_in.push(src);
        }
        Ok(())
    }

    pub fn remove_ctrl_edge(&mut self, src: NodeId, dst: NodeId) -> bool {
        let mut removed = false;
        if let Some(node) = self.node_mut(src) {
            let before = node.ctrl_out.len();
            node.ctrl_out.retain(|peer| *peer != dst);
            removed = node.ctrl_out.len() != before;
        }
        if let Some(node) = self.node_mut(dst) {
            node.ctrl_in.retain(|peer| *peer != src);
        }
        removed
    }

    /// Detaches every edge of `id` and removes it from the graph.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(GraphError::DeadNode { node: id })?;

        for src in node.in_edges.iter().flatten() {
            if let Some(peer) = self.node_mut(src.node) {
                if let Some(list) = peer.out_edges.get_mut(src.index) {
                    list.retain(|port| port.node != id);
                }
            }
        }
        for consumers in &node.out_edges {
            for dst in consumers {
                if let Some(peer) = self.node_mut(dst.node) {
                    if let Some(slot) = peer.in_edges.get_mut(dst.index) {
                        *slot = None;
                    }
                }
            }
        }
        for src in &node.ctrl_in {
            if let Some(peer) = self.node_mut(*src) {
                peer.ctrl_out.retain(|other| *other != id);
            }
        }
        for dst in &node.ctrl_out {
            if let Some(peer) = self.node_mut(*dst) {
                peer.ctrl_in.retain(|other| *other != id);
            }
        }
        self.order.retain(|other| *other != id);
        Ok(node)
    }

    /// Unique data predecessors of `id` in input-port order.
    pub fn data_predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(node) = self.node(id) {
            for src in node.in_edges.iter().flatten() {
                push_unique(&mut out, src.node);
            }
        }
        out
    }

    /// Unique data successors of `id` in output-port, then edge order.
    pub fn data_successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(node) = self.node(id) {
            for consumers in &node.out_edges {
                for dst in consumers {
                    push_unique(&mut out, dst.node);
                }
            }
        }
        out
    }

    /// Unique data and control predecessors; data peers first.
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = self.data_predecessors(id);
        if let Some(node) = self.node(id) {
            for src in &node.ctrl_in {
                push_unique(&mut out, *src);
            }
        }
        out
    }

    /// Unique data and control successors; data peers first.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = self.data_successors(id);
        if let Some(node) = self.node(id) {
            for dst in &node.ctrl_out {
                push_unique(&mut out, *dst);
            }
        }
        out
    }

    /// All data edges, ordered by source node in graph order, then port, then edge order.
    pub fn data_edges(&self) -> Vec<(OutPort, InPort)> {
        let mut edges = Vec::new();
        for id in &self.order {
            let Some(node) = self.node(*id) else {
                continue;
            };
            for (index, consumers) in node.out_edges.iter().enumerate() {
                for dst in consumers {
                    edges.push((OutPort::new(*id, index), *dst));
                }
            }
        }
        edges
    }

    /// All control edges, ordered by source node in graph order.
    pub fn ctrl_edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = Vec::new();
        for id in &self.order {
            if let Some(node) = self.node(*id) {
                edges.extend(node.ctrl_out.iter().map(|dst| (*id, *dst)));
            }
        }
        edges
    }

    /// Replaces the graph order. Callers guarantee `order` is a permutation of live nodes.
    pub(crate) fn set_order(&mut self, order: Vec<NodeId>) {
        self.order = order;
    }

    /// Assigns dense topological ids following the current graph order.
    pub fn renumber(&mut self) {
        let order = self.order.clone();
        for (pos, id) in order.into_iter().enumerate() {
            if let Some(node) = self.node_mut(id) {
                node.topo_id = pos as u32;
            }
        }
    }

    fn allocate(&mut self, desc: OpDesc) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let topo_id = self.order.len() as u32;
        self.nodes.push(Some(Node::new(desc, topo_id)));
        id
    }
}

fn push_unique(values: &mut Vec<NodeId>, value: NodeId) {
    if values.iter().all(|existing| *existing != value) {
        values.push(value);
    }
}
