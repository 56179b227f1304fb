use std::collections::{HashMap, HashSet};

use crate::graph::{topological_sort, ComputeGraph, InPort, NodeId, OpDesc, OutPort};
use crate::optimizer::FusionContext;

use super::edges::{get_fusion_node_ctrl_edge_list, get_fusion_node_edge_list};
use super::propagate::{
    datadump_origins, inplace_aliases, ref_port_indices, strided_port_sizes, tensor_origins,
    write_inplace_aliases,
};
use super::synth::{release_kernels, synthesize, FusedDescriptor};
use super::{FusionCtrlEdgeList, FusionEdgeList, FusionError, FusionScope, ScopeId};

/// Everything needed to replace one scope, computed without touching the graph.
#[derive(Debug, Clone)]
pub struct SplicePlan {
    pub scope: ScopeId,
    /// Constituents in graph order.
    pub nodes: Vec<NodeId>,
    pub names: Vec<String>,
    pub edges: FusionEdgeList,
    pub ctrl_edges: FusionCtrlEdgeList,
    pub fused: FusedDescriptor,
    /// Fused ports whose size was taken from a strided adapter.
    pub strided_ports: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceOutcome {
    pub scope: ScopeId,
    pub fused_node: NodeId,
    pub fused_name: String,
    /// Names of the removed constituents.
    pub erased: Vec<String>,
    pub boundary_edges: usize,
}

/// Classifies the scope's edges and synthesizes the fused descriptor.
///
/// Fails without side effects on the graph; the kernel registry is only touched once every
/// descriptor check has passed.
pub fn plan_splice(
    graph: &ComputeGraph,
    scope: &FusionScope,
    cx: &FusionContext,
) -> Result<SplicePlan, FusionError> {
    if scope.nodes.is_empty() {
        return Err(FusionError::EmptyScope);
    }
    let rank: HashMap<NodeId, usize> = graph
        .node_ids()
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(scope.nodes.len());
    for &id in &scope.nodes {
        if !rank.contains_key(&id) {
            return Err(FusionError::StaleNode {
                node: id,
                context: "planning a splice",
            });
        }
        if seen.insert(id) {
            nodes.push(id);
        }
    }
    nodes.sort_by_key(|id| rank[id]);

    let edges = get_fusion_node_edge_list(graph, &nodes)?;
    let ctrl_edges = get_fusion_node_ctrl_edge_list(graph, &nodes)?;
    let mut fused = synthesize(graph, &nodes, &edges, cx)?;

    let descs: Vec<&OpDesc> = nodes.iter().filter_map(|id| graph.desc(*id)).collect();
    let aliases = inplace_aliases(graph, &edges);
    write_inplace_aliases(&mut fused.desc, &aliases);
    let strided_ports = strided_port_sizes(graph, &edges, &mut fused.desc);
    tensor_origins(graph, &edges, &mut fused.desc);
    datadump_origins(&descs, &mut fused.desc);
    ref_port_indices(&edges, &mut fused.desc);

    let names = descs.iter().map(|desc| desc.name.clone()).collect();
    Ok(SplicePlan {
        scope: scope.id,
        nodes,
        names,
        edges,
        ctrl_edges,
        fused,
        strided_ports,
    })
}

/// Inserts the fused node, moves every boundary edge onto it, removes the constituents and
/// re-sorts the graph.
///
/// Any failure here leaves the graph half edited and is reported as fatal.
pub fn commit_splice(
    graph: &mut ComputeGraph,
    plan: SplicePlan,
) -> Result<SpliceOutcome, FusionError> {
    let fused_name = plan.fused.desc.name.clone();
    let commit_err = |source| FusionError::Commit {
        fused_name: fused_name.clone(),
        source,
    };

    let anchor = plan.nodes[0];
    let fused = graph
        .insert_node_before(plan.fused.desc, anchor)
        .map_err(commit_err)?;

    for input in &plan.edges.inputs {
        graph
            .remove_data_edge(input.src, input.dst)
            .map_err(commit_err)?;
        graph
            .add_data_edge(input.src, InPort::new(fused, input.fused_index))
            .map_err(commit_err)?;
    }
    for output in &plan.edges.outputs {
        let src = OutPort::new(fused, output.fused_index);
        for dst in &output.dsts {
            graph
                .remove_data_edge(output.src, *dst)
                .map_err(commit_err)?;
            graph.add_data_edge(src, *dst).map_err(commit_err)?;
        }
    }
    for src in plan.ctrl_edges.external_sources() {
        graph.add_ctrl_edge(src, fused).map_err(commit_err)?;
    }
    for dst in plan.ctrl_edges.external_targets() {
        graph.add_ctrl_edge(fused, dst).map_err(commit_err)?;
    }
    for id in &plan.nodes {
        graph.remove_node(*id).map_err(commit_err)?;
    }

    topological_sort(graph).map_err(|source| FusionError::CycleAfterSplice {
        fused_name: fused_name.clone(),
        source,
    })?;

    Ok(SpliceOutcome {
        scope: plan.scope,
        fused_node: fused,
        fused_name,
        erased: plan.names,
        boundary_edges: plan.edges.boundary_edge_count(),
    })
}

/// Replaces the nodes of `scope` with one fused node.
pub fn splice_scope(
    graph: &mut ComputeGraph,
    scope: &FusionScope,
    cx: &FusionContext,
) -> Result<SpliceOutcome, FusionError> {
    let plan = plan_splice(graph, scope, cx)?;
    let relocated = plan.fused.kernel.is_some();
    log::debug!(
        "scope {}: splicing {} node(s) into `{}` ({} in / {} out, {} strided port(s))",
        plan.scope,
        plan.nodes.len(),
        plan.fused.desc.name,
        plan.edges.inputs.len(),
        plan.edges.outputs.len(),
        plan.strided_ports
    );

    let outcome = commit_splice(graph, plan)?;
    if relocated {
        let stale: Vec<String> = outcome
            .erased
            .iter()
            .filter(|name| **name != outcome.fused_name)
            .cloned()
            .collect();
        release_kernels(&stale, cx.services());
    }
    Ok(outcome)
}
