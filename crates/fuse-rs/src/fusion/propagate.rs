//! Metadata carried from constituents onto the fused descriptor after synthesis.

use std::collections::HashSet;

use crate::graph::{AttrValue, ComputeGraph, InPort, OpDesc, OutPort, TensorDesc};

use super::attrs;
use super::FusionEdgeList;

/// Stamps each fused port descriptor with the node and output index the value came from.
///
/// Provenance recorded by an earlier fusion is kept.
pub fn tensor_origins(graph: &ComputeGraph, edges: &FusionEdgeList, desc: &mut OpDesc) {
    for input in &edges.inputs {
        if let Some(tensor) = desc.inputs.get_mut(input.fused_index) {
            stamp_origin(tensor, &input.src_name, input.src.index);
        }
    }
    for output in &edges.outputs {
        let Some(owner) = graph.node(output.src.node) else {
            continue;
        };
        if let Some(tensor) = desc.outputs.get_mut(output.fused_index) {
            stamp_origin(tensor, owner.name(), output.src.index);
        }
    }
}

fn stamp_origin(tensor: &mut TensorDesc, node_name: &str, index: usize) {
    tensor
        .attrs
        .entry(attrs::ORIGIN_NODE_NAME.to_string())
        .or_insert_with(|| AttrValue::String(node_name.to_string()));
    tensor
        .attrs
        .entry(attrs::ORIGIN_OUTPUT_INDEX.to_string())
        .or_insert(AttrValue::I64(index as i64));
}

/// Maps in-place outputs of the fused node to the fused inputs they alias.
///
/// Starting at each boundary output, follows constituent alias pairs backwards through
/// internal edges. A chain ending at a boundary input yields one `(output, input)` pair;
/// a chain reaching another boundary output stops without a pair.
pub fn inplace_aliases(graph: &ComputeGraph, edges: &FusionEdgeList) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for output in &edges.outputs {
        if let Some(input) = trace_alias(graph, edges, output.src) {
            pairs.push((output.fused_index, input));
        }
    }
    pairs
}

fn trace_alias(graph: &ComputeGraph, edges: &FusionEdgeList, start: OutPort) -> Option<usize> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    while let Some(port) = stack.pop() {
        if !visited.insert(port) {
            continue;
        }
        let Some(desc) = graph.desc(port.node) else {
            continue;
        };
        for aliased in alias_inputs(desc, port.index) {
            let dst = InPort::new(port.node, aliased);
            if let Some(fused_input) = edges.input_index(dst) {
                return Some(fused_input);
            }
            let Some(src) = graph.producer(dst) else {
                continue;
            };
            if src != start && edges.output_index(src).is_some() {
                continue;
            }
            stack.push(src);
        }
    }
    None
}

/// Input indices aliased by output `output` according to the flattened pair list.
fn alias_inputs(desc: &OpDesc, output: usize) -> Vec<usize> {
    let Some(flat) = desc
        .attr(attrs::INPLACE_ALIAS)
        .and_then(AttrValue::as_i64_list)
    else {
        return Vec::new();
    };
    flat.chunks_exact(2)
        .filter(|pair| pair[0] == output as i64 && pair[1] >= 0)
        .map(|pair| pair[1] as usize)
        .collect()
}

pub fn write_inplace_aliases(desc: &mut OpDesc, pairs: &[(usize, usize)]) {
    if pairs.is_empty() {
        desc.attrs.remove(attrs::INPLACE_ALIAS);
        return;
    }
    let flat = pairs
        .iter()
        .flat_map(|(output, input)| [*output as i64, *input as i64])
        .collect();
    desc.attrs
        .insert(attrs::INPLACE_ALIAS.to_string(), AttrValue::I64List(flat));
}

/// Overrides fused port sizes next to strided adapters with the adapter's span size.
///
/// Returns the number of ports updated.
pub fn strided_port_sizes(
    graph: &ComputeGraph,
    edges: &FusionEdgeList,
    desc: &mut OpDesc,
) -> usize {
    let mut updated = 0;
    for output in &edges.outputs {
        let Some(tensor) = desc.outputs.get_mut(output.fused_index) else {
            continue;
        };
        let info = output.dsts.iter().find_map(|dst| {
            let consumer = graph.desc(dst.node)?;
            if consumer.op_type != attrs::OP_TYPE_STRIDED_WRITE {
                return None;
            }
            consumer.strided_info()
        });
        if let Some(size) = info.and_then(|info| info.transfer_size(tensor.dtype)) {
            tensor.size = Some(size);
            updated += 1;
        }
    }
    for input in &edges.inputs {
        let Some(tensor) = desc.inputs.get_mut(input.fused_index) else {
            continue;
        };
        let info = graph
            .desc(input.src.node)
            .filter(|producer| producer.op_type == attrs::OP_TYPE_STRIDED_READ)
            .and_then(OpDesc::strided_info);
        if let Some(size) = info.and_then(|info| info.transfer_size(tensor.dtype)) {
            tensor.size = Some(size);
            updated += 1;
        }
    }
    updated
}

/// Records every original operator behind the fused node for data dumps.
///
/// A constituent that is itself the result of an earlier fusion contributes its recorded
/// chain instead of its own name.
pub fn datadump_origins(descs: &[&OpDesc], desc: &mut OpDesc) {
    let mut names = Vec::new();
    let mut types = Vec::new();
    for constituent in descs {
        let recorded_names = constituent
            .attr(attrs::DATADUMP_ORIGIN_NAMES)
            .and_then(AttrValue::as_string_list);
        let recorded_types = constituent
            .attr(attrs::DATADUMP_ORIGIN_TYPES)
            .and_then(AttrValue::as_string_list);
        match (recorded_names, recorded_types) {
            (Some(recorded_names), Some(recorded_types)) => {
                names.extend_from_slice(recorded_names);
                types.extend_from_slice(recorded_types);
            }
            _ => {
                names.push(constituent.name.clone());
                types.push(constituent.op_type.clone());
            }
        }
    }
    desc.attrs.insert(
        attrs::DATADUMP_ORIGIN_NAMES.to_string(),
        AttrValue::StringList(names),
    );
    desc.attrs.insert(
        attrs::DATADUMP_ORIGIN_TYPES.to_string(),
        AttrValue::StringList(types),
    );
}

/// Rewrites `ref_port_index` on outputs of a reference fused node to fused input indices.
///
/// An output referring to an input that became internal loses the attribute.
pub fn ref_port_indices(edges: &FusionEdgeList, desc: &mut OpDesc) {
    if desc.bool_attr(attrs::REFERENCE) != Some(true) {
        return;
    }
    for output in &edges.outputs {
        let Some(tensor) = desc.outputs.get_mut(output.fused_index) else {
            continue;
        };
        let Some(local) = tensor
            .attrs
            .get(attrs::REF_PORT_INDEX)
            .and_then(AttrValue::as_i64)
        else {
            continue;
        };
        let fused = usize::try_from(local)
            .ok()
            .and_then(|index| edges.input_index(InPort::new(output.src.node, index)));
        match fused {
            Some(index) => {
                tensor.attrs.insert(
                    attrs::REF_PORT_INDEX.to_string(),
                    AttrValue::I64(index as i64),
                );
            }
            None => {
                log::debug!(
                    "output {} refers to an internal input; dropping `{}`",
                    output.src,
                    attrs::REF_PORT_INDEX
                );
                tensor.attrs.remove(attrs::REF_PORT_INDEX);
            }
        }
    }
}
