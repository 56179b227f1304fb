use std::sync::Arc;

use crate::graph::{
    AttrValue, ComputeGraph, ExtAttr, GraphError, NodeId, OpDesc, OpSliceInfo, TensorDesc,
    TensorSlice,
};
use crate::kernel::{KernelHandle, RegistryError};
use crate::optimizer::{FusionContext, FusionServices};

use super::attrs;
use super::policy::merge_attrs;
use super::{FusionEdgeList, FusionError};

/// Descriptor of the node replacing a scope, plus the kernel handle registered for it.
#[derive(Debug, Clone)]
pub struct FusedDescriptor {
    pub desc: OpDesc,
    pub kernel: Option<KernelHandle>,
}

/// Name of the fused node: constituent names concatenated, or `<first>_fused` when that
/// exceeds `max_len` bytes.
pub fn fused_node_name(descs: &[&OpDesc], max_len: usize) -> String {
    let joined: String = descs.iter().map(|desc| desc.name.as_str()).collect();
    match descs.first() {
        Some(first) if joined.len() > max_len => format!("{}_fused", first.name),
        _ => joined,
    }
}

/// Builds the descriptor of the node that replaces `nodes`.
///
/// `nodes` must be in graph order; the first is the primary constituent. Port lists follow
/// the slots in `edges`. When a constituent carries a kernel binary it is re-registered
/// under the fused name; nothing is registered when synthesis fails earlier.
pub fn synthesize(
    graph: &ComputeGraph,
    nodes: &[NodeId],
    edges: &FusionEdgeList,
    cx: &FusionContext,
) -> Result<FusedDescriptor, FusionError> {
    if nodes.is_empty() {
        return Err(FusionError::EmptyScope);
    }
    let descs = nodes
        .iter()
        .map(|id| {
            graph.desc(*id).ok_or(FusionError::StaleNode {
                node: *id,
                context: "synthesizing a fused descriptor",
            })
        })
        .collect::<Result<Vec<&OpDesc>, _>>()?;
    let primary = descs[0];
    let config = cx.config();

    let name = fused_node_name(&descs, config.max_fused_name_len);
    if primary.attr(attrs::KERNEL_MAGIC).is_none() {
        return Err(FusionError::MissingKernelMeta {
            node_name: primary.name.clone(),
            attr: attrs::KERNEL_MAGIC,
        });
    }

    let mut desc = OpDesc::new(name.clone(), primary.op_type.clone());
    desc.attrs = merge_attrs(&descs, config);
    if desc.attr(attrs::IMPLY_TYPE).is_none() {
        return Err(FusionError::MissingImplyType { fused_name: name });
    }
    desc.attrs.insert(
        attrs::IS_COMPILED_FUSION_OP.to_string(),
        AttrValue::Bool(true),
    );
    if config.tuning_mode {
        let names = descs.iter().map(|d| d.name.clone()).collect();
        desc.attrs
            .insert(attrs::TUNING_NODES.to_string(), AttrValue::StringList(names));
    }

    desc.inputs = boundary_input_descs(graph, edges)?;
    desc.outputs = boundary_output_descs(graph, edges)?;

    for constituent in &descs {
        for (key, ext) in &constituent.ext_attrs {
            if matches!(ext, ExtAttr::KernelBinary(_) | ExtAttr::SliceInfo(_)) {
                continue;
            }
            desc.ext_attrs
                .entry(key.clone())
                .or_insert_with(|| ext.clone());
        }
    }

    if let Some(info) = merge_slice_info(graph, &descs, edges) {
        desc.attrs.insert(
            attrs::SLICE_INFO_JSON.to_string(),
            AttrValue::String(info.to_json()?),
        );
        desc.ext_attrs
            .insert(attrs::EXT_SLICE_INFO.to_string(), ExtAttr::SliceInfo(info));
    }

    let kernel = relocate_kernel_binary(&descs, &mut desc, cx)?;
    Ok(FusedDescriptor { desc, kernel })
}

fn boundary_input_descs(
    graph: &ComputeGraph,
    edges: &FusionEdgeList,
) -> Result<Vec<TensorDesc>, FusionError> {
    let mut out = Vec::with_capacity(edges.inputs.len());
    for input in &edges.inputs {
        let owner = graph.try_node(input.dst.node)?;
        let tensor = owner
            .desc
            .inputs
            .get(input.dst.index)
            .cloned()
            .ok_or(GraphError::InputOutOfRange {
                node: input.dst.node,
                index: input.dst.index,
                count: owner.desc.inputs.len(),
            })?;
        out.push(tensor);
    }
    Ok(out)
}

fn boundary_output_descs(
    graph: &ComputeGraph,
    edges: &FusionEdgeList,
) -> Result<Vec<TensorDesc>, FusionError> {
    let mut out = Vec::with_capacity(edges.outputs.len());
    for output in &edges.outputs {
        let owner = graph.try_node(output.src.node)?;
        let tensor = owner
            .desc
            .outputs
            .get(output.src.index)
            .cloned()
            .ok_or(GraphError::OutputOutOfRange {
                node: output.src.node,
                index: output.src.index,
                count: owner.desc.outputs.len(),
            })?;
        out.push(tensor);
    }
    Ok(out)
}

/// Re-indexes per-thread slices from constituent ports onto fused ports.
///
/// Thread mode and instance count come from the first constituent that has slice info.
/// Ports of constituents without slice info get empty slices.
fn merge_slice_info(
    graph: &ComputeGraph,
    descs: &[&OpDesc],
    edges: &FusionEdgeList,
) -> Option<OpSliceInfo> {
    let first = descs.iter().find_map(|desc| desc.slice_info())?;
    let threads = descs
        .iter()
        .filter_map(|desc| desc.slice_info())
        .map(OpSliceInfo::thread_count)
        .max()
        .unwrap_or(0);

    let mut merged = OpSliceInfo {
        thread_mode: first.thread_mode,
        slice_instance_num: first.slice_instance_num,
        input_tensor_slice: Vec::with_capacity(threads),
        output_tensor_slice: Vec::with_capacity(threads),
    };
    for thread in 0..threads {
        let inputs = edges
            .inputs
            .iter()
            .map(|input| {
                port_slice(graph, input.dst.node, |info| {
                    info.input_slice(thread, input.dst.index)
                })
            })
            .collect();
        let outputs = edges
            .outputs
            .iter()
            .map(|output| {
                port_slice(graph, output.src.node, |info| {
                    info.output_slice(thread, output.src.index)
                })
            })
            .collect();
        merged.input_tensor_slice.push(inputs);
        merged.output_tensor_slice.push(outputs);
    }
    Some(merged)
}

fn port_slice(
    graph: &ComputeGraph,
    node: NodeId,
    pick: impl FnOnce(&OpSliceInfo) -> Option<&TensorSlice>,
) -> TensorSlice {
    graph
        .desc(node)
        .and_then(OpDesc::slice_info)
        .and_then(pick)
        .cloned()
        .unwrap_or_default()
}

/// Copies the first constituent's kernel binary under the fused name and registers it.
///
/// A name already registered with another payload fails the scope instead of handing the
/// fused node a foreign kernel.
fn relocate_kernel_binary(
    descs: &[&OpDesc],
    desc: &mut OpDesc,
    cx: &FusionContext,
) -> Result<Option<KernelHandle>, FusionError> {
    let owned = descs.iter().find_map(|constituent| {
        constituent.ext_attrs.iter().find_map(|(key, ext)| match ext {
            ExtAttr::KernelBinary(binary) => Some((key, binary)),
            _ => None,
        })
    });
    let Some((key, binary)) = owned else {
        return Ok(None);
    };

    let name = desc.name.clone();
    if binary.data.is_empty() {
        return Err(FusionError::KernelPayload {
            fused_name: name,
            source: RegistryError::EmptyBinary {
                name: binary.name.clone(),
            },
        });
    }

    let services = cx.services();
    let relocated = Arc::new(binary.renamed(name.as_str()));
    let handle = services
        .registry
        .register(&name, Arc::clone(&relocated))
        .map_err(|source| FusionError::KernelPayload {
            fused_name: name.clone(),
            source,
        })?;
    let stored = services.registry.binary(&name).unwrap_or(relocated);
    services
        .handles
        .store_handle(&name, handle.clone(), Arc::clone(&stored));
    log::debug!(
        "relocated kernel binary `{}` ({} bytes) to `{name}`",
        binary.name,
        stored.size()
    );
    desc.ext_attrs
        .insert(key.clone(), ExtAttr::KernelBinary(stored));
    Ok(Some(handle))
}

/// Drops one handle owner per name and the registry reference that owner held. Returns how
/// many registry entries were freed.
pub fn release_kernels(names: &[String], services: &FusionServices) -> usize {
    services
        .handles
        .erase_handles(names)
        .iter()
        .filter(|handle| services.registry.release(&handle.name))
        .count()
}

/// Releases the kernels relocated for the fused nodes of `graph`, once the graph itself is
/// discarded.
pub fn release_fused_kernels(graph: &ComputeGraph, services: &FusionServices) -> usize {
    let names: Vec<String> = graph
        .node_ids()
        .iter()
        .filter_map(|id| graph.desc(*id))
        .filter(|desc| desc.bool_attr(attrs::IS_COMPILED_FUSION_OP) == Some(true))
        .filter(|desc| desc.kernel_binary().is_some())
        .map(|desc| desc.name.clone())
        .collect();
    let freed = release_kernels(&names, services);
    log::debug!(
        "graph `{}`: released {} fused kernel(s)",
        graph.name(),
        freed
    );
    freed
}
