use std::collections::{HashMap, HashSet};

use crate::graph::{ComputeGraph, InPort, Node, NodeId, OutPort};

use super::{BoundaryInput, BoundaryOutput, FusionCtrlEdgeList, FusionEdgeList, FusionError};

/// Classifies every data edge touching `nodes` as internal or boundary and assigns fused
/// port indices.
///
/// Inputs get one slot per boundary edge, visited in node-list order then input-port order.
/// Outputs get one slot per constituent output anchor read outside the scope, visited in
/// node-list order then output-port order; all external consumers of that anchor share the
/// slot. An output anchor with no consumers at all also gets a slot so the value stays
/// addressable. Duplicate ids in `nodes` are ignored after their first occurrence.
pub fn get_fusion_node_edge_list(
    graph: &ComputeGraph,
    nodes: &[NodeId],
) -> Result<FusionEdgeList, FusionError> {
    let (members, ordered) = live_members(graph, nodes, "classifying data edges")?;
    let mut list = FusionEdgeList::default();
    let mut input_index_of = HashMap::new();
    let mut output_index_of = HashMap::new();

    for &id in &ordered {
        let node = member(graph, id)?;
        for index in 0..node.input_count() {
            let Some(src) = node.producer(index) else {
                continue;
            };
            if members.contains(&src.node) {
                list.internal_edges += 1;
                continue;
            }
            let src_name = peer(graph, src.node, "classifying data edges")?
                .name()
                .to_string();
            let dst = InPort::new(id, index);
            let fused_index = list.inputs.len();
            input_index_of.insert(dst, fused_index);
            list.inputs.push(BoundaryInput {
                src,
                src_name,
                dst,
                fused_index,
            });
        }
    }

    for &id in &ordered {
        let node = member(graph, id)?;
        for index in 0..node.output_count() {
            let consumers = node.consumers(index);
            let mut dsts = Vec::new();
            let mut dst_names = Vec::new();
            for dst in consumers {
                if members.contains(&dst.node) {
                    continue;
                }
                let consumer = peer(graph, dst.node, "classifying data edges")?;
                dsts.push(*dst);
                dst_names.push(consumer.name().to_string());
            }
            if dsts.is_empty() && !consumers.is_empty() {
                continue;
            }
            let src = OutPort::new(id, index);
            let fused_index = list.outputs.len();
            output_index_of.insert(src, fused_index);
            list.outputs.push(BoundaryOutput {
                src,
                dsts,
                dst_names,
                fused_index,
            });
        }
    }

    list.input_index_of = input_index_of;
    list.output_index_of = output_index_of;
    Ok(list)
}

/// Collects control edges crossing the boundary of `nodes`. Control edges with both ends
/// inside the scope are counted and dropped.
pub fn get_fusion_node_ctrl_edge_list(
    graph: &ComputeGraph,
    nodes: &[NodeId],
) -> Result<FusionCtrlEdgeList, FusionError> {
    let (members, ordered) = live_members(graph, nodes, "classifying control edges")?;
    let mut list = FusionCtrlEdgeList::default();

    for &id in &ordered {
        let node = member(graph, id)?;
        for src in node.ctrl_in() {
            if members.contains(src) {
                continue;
            }
            peer(graph, *src, "classifying control edges")?;
            list.in_edges.push((*src, id));
        }
        for dst in node.ctrl_out() {
            if members.contains(dst) {
                list.internal_edges += 1;
                continue;
            }
            peer(graph, *dst, "classifying control edges")?;
            list.out_edges.push((id, *dst));
        }
    }

    Ok(list)
}

fn live_members(
    graph: &ComputeGraph,
    nodes: &[NodeId],
    context: &'static str,
) -> Result<(HashSet<NodeId>, Vec<NodeId>), FusionError> {
    if nodes.is_empty() {
        return Err(FusionError::EmptyScope);
    }
    let mut members = HashSet::with_capacity(nodes.len());
    let mut ordered = Vec::with_capacity(nodes.len());
    for &id in nodes {
        if !graph.contains(id) {
            return Err(FusionError::StaleNode { node: id, context });
        }
        if members.insert(id) {
            ordered.push(id);
        }
    }
    Ok((members, ordered))
}

fn member(graph: &ComputeGraph, id: NodeId) -> Result<&Node, FusionError> {
    graph.node(id).ok_or(FusionError::StaleNode {
        node: id,
        context: "reading a scope member",
    })
}

fn peer<'g>(
    graph: &'g ComputeGraph,
    id: NodeId,
    context: &'static str,
) -> Result<&'g Node, FusionError> {
    graph
        .node(id)
        .ok_or(FusionError::StaleNode { node: id, context })
}
