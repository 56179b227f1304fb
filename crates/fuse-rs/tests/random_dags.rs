
use std::collections::BTreeSet;

use fuse_rs::fusion::{attrs, get_fusion_node_edge_list, select_scopes, splice_scope};
use fuse_rs::graph::{validate_graph_topology, ComputeGraph, GraphBuilder, InPort};
use fuse_rs::fuse_graph;
use fuse_rs::optimizer::FusionConfig;
use fusion_support::{context, context_with, data_degree, kernel_op, names, out0, plain_op, tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEEDS: u64 = 48;
const OPS: usize = 14;

/// Random DAG over two graph inputs. Every op reads one or two earlier values and about
/// three in four ops carry one of three scope ids.
fn random_graph(seed: u64) -> ComputeGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let t = tensor();
    let mut builder = GraphBuilder::new(format!("random_{seed}"));
    let mut values = vec![builder.data("in0", t.clone()), builder.data("in1", t.clone())];
    for index in 0..OPS {
        let arity = rng.gen_range(1..=2);
        let producers: Vec<_> = (0..arity)
            .map(|_| out0(values[rng.gen_range(0..values.len())]))
            .collect();
        let name = format!("n{index}");
        let desc = match rng.gen_range(0..4) {
            0 => plain_op(&name, "Identity"),
            scope => kernel_op(&name, "Relu", scope),
        };
        let id = builder.op(desc, &producers, &t, 1).expect("add op");
        values.push(id);
    }
    builder.finish()
}

fn op_names(graph: &ComputeGraph) -> BTreeSet<String> {
    names(graph)
        .into_iter()
        .filter(|name| name.starts_with('n'))
        .collect()
}

fn assert_inputs_connected(graph: &ComputeGraph) {
    for id in graph.node_ids() {
        let node = graph.node(*id).expect("live");
        for index in 0..node.input_count() {
            assert!(
                graph.producer(InPort::new(*id, index)).is_some(),
                "input {index} of `{}` lost its producer",
                node.name()
            );
        }
    }
}

#[test]
fn fusion_keeps_random_graphs_acyclic_and_connected() {
    for seed in 0..SEEDS {
        let mut graph = random_graph(seed);
        let before = op_names(&graph);
        let mut cx = context();

        let result = fuse_graph(&mut graph, &mut cx)
            .unwrap_or_else(|err| panic!("seed {seed}: {err:#}"));
        assert_eq!(result.scopes_failed, 0, "seed {seed}");
        validate_graph_topology(&graph).expect("sorted after fusion");
        assert_inputs_connected(&graph);

        // Every original op survives either as itself or inside exactly one fused node.
        let mut after = BTreeSet::new();
        for id in graph.node_ids() {
            let desc = graph.desc(*id).expect("live");
            match desc
                .attr(attrs::DATADUMP_ORIGIN_NAMES)
                .and_then(|value| value.as_string_list())
            {
                Some(origins) if desc.bool_attr(attrs::IS_COMPILED_FUSION_OP) == Some(true) => {
                    for origin in origins {
                        assert!(
                            after.insert(origin.clone()),
                            "seed {seed}: `{origin}` fused twice"
                        );
                    }
                }
                _ if desc.name.starts_with('n') => {
                    assert!(after.insert(desc.name.clone()), "seed {seed}");
                }
                _ => {}
            }
        }
        assert_eq!(after, before, "seed {seed}");
    }
}

#[test]
fn each_splice_preserves_boundary_edge_count() {
    for seed in 0..SEEDS {
        let mut graph = random_graph(seed);
        let (cx, _services) = context_with(FusionConfig::default());
        let selection = select_scopes(&graph, cx.config()).expect("acyclic");
        let Some(scope) = selection
            .scopes
            .scope_ids()
            .next()
            .and_then(|id| selection.scopes.scope(id))
        else {
            continue;
        };

        let edges_before = graph.data_edges().len();
        let classified = get_fusion_node_edge_list(&graph, &scope.nodes).expect("classify");
        let outcome = splice_scope(&mut graph, &scope, &cx)
            .unwrap_or_else(|err| panic!("seed {seed}: {err}"));
        assert_eq!(
            data_degree(&graph, outcome.fused_node),
            outcome.boundary_edges,
            "seed {seed}"
        );
        assert_eq!(outcome.boundary_edges, classified.boundary_edge_count());
        assert_eq!(
            edges_before - graph.data_edges().len(),
            classified.internal_edges,
            "seed {seed}"
        );
        validate_graph_topology(&graph).expect("sorted after splice");
    }
}

#[test]
fn fusion_is_deterministic() {
    for seed in 0..SEEDS {
        let mut first = random_graph(seed);
        let mut second = random_graph(seed);
        fuse_graph(&mut first, &mut context()).expect("fuse");
        fuse_graph(&mut second, &mut context()).expect("fuse");
        assert_eq!(names(&first), names(&second), "seed {seed}");
        assert_eq!(first.data_edges(), second.data_edges(), "seed {seed}");
        assert_eq!(first.ctrl_edges(), second.ctrl_edges(), "seed {seed}");
    }
}
