
use fuse_rs::fusion::{attrs, FusionError};
use fuse_rs::graph::{
    validate_graph_topology, ComputeGraph, GraphBuilder, InPort, NodeId, OutPort,
};
use fuse_rs::{fuse_graph, GraphPass, PassResult, ScopeFusionPass};
use fusion_support::{chain, context, data_degree, kernel_op, names, out0, plain_op, tensor};

struct TwoScopes {
    graph: ComputeGraph,
    c: NodeId,
    d: NodeId,
}

/// `x -> A -> B -> y1` in scope 1 and `x -> C -> D -> y2` in scope 2.
fn two_scopes() -> TwoScopes {
    let t = tensor();
    let mut builder = GraphBuilder::new("two_scopes");
    let x = builder.data("x", t.clone());
    let a = builder
        .op(kernel_op("A", "Relu", 1), &[out0(x)], &t, 1)
        .expect("add A");
    let b = builder
        .op(kernel_op("B", "Abs", 1), &[out0(a)], &t, 1)
        .expect("add B");
    let c = builder
        .op(kernel_op("C", "Exp", 2), &[out0(x)], &t, 1)
        .expect("add C");
    let d = builder
        .op(kernel_op("D", "Log", 2), &[out0(c)], &t, 1)
        .expect("add D");
    builder
        .op(plain_op("y1", "NetOutput"), &[out0(b)], &t, 0)
        .expect("add y1");
    builder
        .op(plain_op("y2", "NetOutput"), &[out0(d)], &t, 0)
        .expect("add y2");
    TwoScopes {
        graph: builder.finish(),
        c,
        d,
    }
}

#[test]
fn independent_scopes_are_fused_and_renumbered() {
    let mut fixture = two_scopes();
    let mut cx = context();

    let result = fuse_graph(&mut fixture.graph, &mut cx).expect("fuse");
    assert_eq!(
        result,
        PassResult {
            changed: true,
            scopes_fused: 2,
            scopes_failed: 0,
            erased_nodes: 4,
        }
    );

    let graph = &fixture.graph;
    assert_eq!(graph.len(), 5);
    let mut remaining = names(graph);
    remaining.sort();
    assert_eq!(remaining, ["AB", "CD", "x", "y1", "y2"]);
    validate_graph_topology(graph).expect("sorted");
    for (pos, id) in graph.node_ids().iter().enumerate() {
        assert_eq!(graph.node(*id).expect("live").topo_id(), pos as u32);
    }
    for fused in ["AB", "CD"] {
        let id = graph.find_node(fused).expect("fused node");
        assert_eq!(data_degree(graph, id), 2);
    }
}

#[test]
fn failed_scope_is_recorded_and_others_still_fuse() {
    let mut fixture = two_scopes();
    for node in [fixture.c, fixture.d] {
        fixture
            .graph
            .desc_mut(node)
            .expect("alive")
            .attrs
            .remove(attrs::IMPLY_TYPE);
    }
    let mut cx = context();

    let result = ScopeFusionPass
        .run(&mut fixture.graph, &mut cx)
        .expect("non-fatal failure");
    assert_eq!(result.scopes_fused, 1);
    assert_eq!(result.scopes_failed, 1);
    assert_eq!(cx.failed_scopes().collect::<Vec<_>>(), [2]);
    assert!(fixture.graph.contains(fixture.c));
    assert!(fixture.graph.contains(fixture.d));
    assert!(fixture.graph.find_node("AB").is_some());

    // Fused nodes are not regrouped; the failed scope is tried once more and fails again.
    let again = ScopeFusionPass
        .run(&mut fixture.graph, &mut cx)
        .expect("second run");
    assert_eq!(
        again,
        PassResult {
            changed: false,
            scopes_fused: 0,
            scopes_failed: 1,
            erased_nodes: 0,
        }
    );
    assert_eq!(cx.failed_scopes().collect::<Vec<_>>(), [2]);
}

#[test]
fn failure_in_one_graph_does_not_block_the_same_scope_id_in_the_next() {
    let mut broken = chain(1);
    for node in [broken.a, broken.b, broken.c] {
        broken
            .graph
            .desc_mut(node)
            .expect("alive")
            .attrs
            .remove(attrs::IMPLY_TYPE);
    }
    let mut cx = context();
    let result = fuse_graph(&mut broken.graph, &mut cx).expect("non-fatal failure");
    assert_eq!(result.scopes_failed, 1);
    assert_eq!(cx.failed_scopes().collect::<Vec<_>>(), [1]);

    let mut valid = chain(1);
    let result = fuse_graph(&mut valid.graph, &mut cx).expect("fuse");
    assert_eq!(result.scopes_fused, 1);
    assert_eq!(result.scopes_failed, 0);
    assert_eq!(names(&valid.graph), ["x", "ABC", "y"]);
    assert_eq!(cx.failed_scopes().count(), 0);
}

#[test]
fn interior_output_read_outside_the_scope_becomes_a_second_output() {
    // B also feeds E, which never leads back into the scope.
    let t = tensor();
    let mut builder = GraphBuilder::new("two_outputs");
    let x = builder.data("x", t.clone());
    let a = builder
        .op(kernel_op("A", "Relu", 1), &[out0(x)], &t, 1)
        .expect("add A");
    let b = builder
        .op(kernel_op("B", "Abs", 1), &[out0(a)], &t, 1)
        .expect("add B");
    let c = builder
        .op(kernel_op("C", "Exp", 1), &[out0(b)], &t, 1)
        .expect("add C");
    let e = builder
        .op(plain_op("E", "Identity"), &[out0(b)], &t, 1)
        .expect("add E");
    let y = builder
        .op(plain_op("y", "NetOutput"), &[out0(c)], &t, 0)
        .expect("add y");
    let mut graph = builder.finish();
    let mut cx = context();

    let result = fuse_graph(&mut graph, &mut cx).expect("fuse");
    assert_eq!(result.scopes_fused, 1);
    assert_eq!(result.erased_nodes, 3);
    assert_eq!(names(&graph), ["x", "ABC", "E", "y"]);
    validate_graph_topology(&graph).expect("sorted");

    let fused = graph.find_node("ABC").expect("fused node");
    assert_eq!(graph.desc(fused).expect("live").outputs.len(), 2);
    assert_eq!(graph.producer(InPort::new(e, 0)), Some(OutPort::new(fused, 0)));
    assert_eq!(graph.producer(InPort::new(y, 0)), Some(OutPort::new(fused, 1)));
    assert_eq!(graph.producer(InPort::new(fused, 0)), Some(out0(x)));
}

#[test]
fn unfusible_producer_stays_outside_the_fused_node() {
    // A feeds C outside the scope, so only B and D merge.
    let t = tensor();
    let mut builder = GraphBuilder::new("diamond");
    let x = builder.data("x", t.clone());
    let a = builder
        .op(kernel_op("A", "Relu", 1), &[out0(x)], &t, 1)
        .expect("add A");
    let b = builder
        .op(kernel_op("B", "Abs", 1), &[out0(a)], &t, 1)
        .expect("add B");
    let c = builder
        .op(plain_op("C", "Cast"), &[out0(a)], &t, 1)
        .expect("add C");
    let d = builder
        .op(kernel_op("D", "Add", 1), &[out0(b), out0(c)], &t, 1)
        .expect("add D");
    builder
        .op(plain_op("y", "NetOutput"), &[out0(d)], &t, 0)
        .expect("add y");
    let mut graph = builder.finish();
    let mut cx = context();

    let result = fuse_graph(&mut graph, &mut cx).expect("fuse");
    assert_eq!(result.scopes_fused, 1);
    assert_eq!(result.erased_nodes, 2);
    assert_eq!(names(&graph), ["x", "A", "C", "BD", "y"]);
    validate_graph_topology(&graph).expect("sorted");

    let fused = graph.find_node("BD").expect("fused node");
    assert_eq!(data_degree(&graph, fused), 3);
    assert_eq!(graph.data_predecessors(fused), vec![a, c]);
}

#[test]
fn graph_without_scopes_is_left_alone() {
    let t = tensor();
    let mut builder = GraphBuilder::new("plain");
    let x = builder.data("x", t.clone());
    builder
        .op(plain_op("y", "NetOutput"), &[out0(x)], &t, 0)
        .expect("add y");
    let mut graph = builder.finish();
    let mut cx = context();

    let result = fuse_graph(&mut graph, &mut cx).expect("fuse");
    assert!(!result.changed);
    assert_eq!(names(&graph), ["x", "y"]);
}

#[test]
fn cyclic_input_is_fatal() {
    let mut graph = ComputeGraph::new("cyclic");
    let a = graph.add_node(kernel_op("A", "Relu", 1));
    let b = graph.add_node(kernel_op("B", "Relu", 1));
    graph.add_ctrl_edge(a, b).expect("a -> b");
    graph.add_ctrl_edge(b, a).expect("b -> a");
    let mut cx = context();

    assert_eq!(ScopeFusionPass.name(), "scope_fusion");
    let err = ScopeFusionPass
        .run(&mut graph, &mut cx)
        .expect_err("cyclic input");
    assert!(matches!(err, FusionError::CyclicInput(_)));
    assert!(err.is_fatal());

    let err = fuse_graph(&mut graph, &mut cx).expect_err("cyclic input");
    assert!(err.to_string().contains("scope fusion failed"));
    assert!(err.downcast_ref::<FusionError>().is_some());
}
