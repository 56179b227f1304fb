
use fuse_rs::graph::{topological_order, topological_sort, validate_graph_topology, ComputeGraph};
use fusion_support::{chain, in_port, names, out0, plain_op, tensor};

#[test]
fn sorted_graph_keeps_its_order() {
    let chain = chain(1);
    let order = topological_order(&chain.graph).expect("acyclic");
    assert_eq!(order, chain.graph.node_ids());
    validate_graph_topology(&chain.graph).expect("already topological");
}

#[test]
fn sort_reorders_and_renumbers() {
    let mut graph = ComputeGraph::new("reversed");
    let sink = graph.add_node(plain_op("sink", "NetOutput").with_input(tensor()));
    let mid = graph.add_node(
        plain_op("mid", "Relu")
            .with_input(tensor())
            .with_output(tensor()),
    );
    let src = graph.add_node(plain_op("src", "Data").with_output(tensor()));
    graph
        .add_data_edge(out0(src), in_port(mid, 0))
        .expect("src -> mid");
    graph
        .add_data_edge(out0(mid), in_port(sink, 0))
        .expect("mid -> sink");
    assert!(validate_graph_topology(&graph).is_err());

    topological_sort(&mut graph).expect("acyclic");
    assert_eq!(names(&graph), ["src", "mid", "sink"]);
    validate_graph_topology(&graph).expect("sorted");
    for (pos, id) in graph.node_ids().iter().enumerate() {
        assert_eq!(graph.node(*id).expect("live").topo_id(), pos as u32);
    }
}

#[test]
fn control_edges_constrain_order() {
    let mut graph = ComputeGraph::new("ctrl");
    let a = graph.add_node(plain_op("a", "NoOp"));
    let b = graph.add_node(plain_op("b", "NoOp"));
    graph.add_ctrl_edge(b, a).expect("b before a");

    topological_sort(&mut graph).expect("acyclic");
    assert_eq!(names(&graph), ["b", "a"]);
}

#[test]
fn cycle_is_reported_with_unscheduled_nodes() {
    let mut graph = ComputeGraph::new("cycle");
    let a = graph.add_node(plain_op("a", "NoOp"));
    let b = graph.add_node(plain_op("b", "NoOp"));
    let c = graph.add_node(plain_op("c", "NoOp"));
    graph.add_ctrl_edge(a, b).expect("a -> b");
    graph.add_ctrl_edge(b, c).expect("b -> c");
    graph.add_ctrl_edge(c, b).expect("c -> b");

    let err = topological_sort(&mut graph).expect_err("cycle");
    assert_eq!(err.unscheduled, vec![b, c]);
    assert!(err.to_string().contains("cycle"));
}
