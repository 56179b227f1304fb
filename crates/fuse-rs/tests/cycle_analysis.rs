
use std::collections::HashSet;

use fuse_rs::fusion::{attrs, eligible_scope, select_scopes, ConnectionMatrix, FusibilityAnalyzer};
use fuse_rs::graph::{AttrValue, ComputeGraph, GraphBuilder, NodeId};
use fuse_rs::optimizer::FusionConfig;
use fusion_support::{chain, kernel_op, out0, plain_op, tensor};

/// `x -> A`, `A -> B`, `A -> C`, `B -> D`, `C -> D`, `D -> y`.
struct Diamond {
    graph: ComputeGraph,
    a: NodeId,
    b: NodeId,
    c: NodeId,
    d: NodeId,
}

fn diamond(c_scope: Option<i64>) -> Diamond {
    let t = tensor();
    let mut builder = GraphBuilder::new("diamond");
    let x = builder.data("x", t.clone());
    let a = builder
        .op(kernel_op("A", "Relu", 1), &[out0(x)], &t, 1)
        .expect("add A");
    let b = builder
        .op(kernel_op("B", "Abs", 1), &[out0(a)], &t, 1)
        .expect("add B");
    let c_desc = match c_scope {
        Some(scope) => kernel_op("C", "Cast", scope),
        None => plain_op("C", "Cast"),
    };
    let c = builder.op(c_desc, &[out0(a)], &t, 1).expect("add C");
    let d = builder
        .op(kernel_op("D", "Add", 1), &[out0(b), out0(c)], &t, 1)
        .expect("add D");
    builder
        .op(plain_op("y", "NetOutput"), &[out0(d)], &t, 0)
        .expect("add y");
    Diamond {
        graph: builder.finish(),
        a,
        b,
        c,
        d,
    }
}

#[test]
fn connection_matrix_follows_data_and_control_edges() {
    let mut chain = chain(1);
    let matrix = ConnectionMatrix::build(&chain.graph).expect("acyclic");
    assert!(matrix.reachable(chain.x, chain.y));
    assert!(matrix.reachable(chain.b, chain.b));
    assert!(!matrix.reachable(chain.y, chain.x));
    assert!(!matrix.reachable(chain.c, chain.a));
    assert_eq!(matrix.len(), chain.graph.len());

    let side = chain.graph.add_node(plain_op("side", "NoOp"));
    chain.graph.add_ctrl_edge(chain.c, side).expect("C -> side");
    let matrix = ConnectionMatrix::build(&chain.graph).expect("acyclic");
    assert!(matrix.reachable(chain.a, side));
    assert!(matrix.reaches_any(chain.x, [side].iter()));
    assert!(!matrix.reaches_any(side, [chain.a, chain.y].iter()));
}

#[test]
fn producer_feeding_outside_scope_is_unfusible() {
    // C sits outside the scope, so A can fold into B but not into C.
    let diamond = diamond(None);
    let config = FusionConfig::default();
    let analyzer = FusibilityAnalyzer::new(&diamond.graph, &config).expect("acyclic");

    let unfusible = analyzer.compute_unfusible_nodes();
    assert_eq!(unfusible, HashSet::from([diamond.a]));

    let selection = select_scopes(&diamond.graph, &config).expect("acyclic");
    assert_eq!(selection.scopes.get(1), Some(&[diamond.b, diamond.d][..]));
    assert!(selection.unfusible.contains(&diamond.a));
}

#[test]
fn able_to_fuse_on_all_paths_requires_shared_scope_on_intermediates() {
    let split = diamond(Some(2));
    let config = FusionConfig::default();
    let analyzer = FusibilityAnalyzer::new(&split.graph, &config).expect("acyclic");
    let mut memo = Default::default();
    let none = HashSet::new();

    // The A -> C -> D path runs through scope 2.
    assert!(!analyzer.able_to_fuse_on_all_paths(split.a, split.d, &none, &mut memo));
    assert!(analyzer.able_to_fuse_on_all_paths(split.a, split.b, &none, &mut memo));
    assert!(analyzer.able_to_fuse_on_all_paths(split.b, split.d, &none, &mut memo));
    assert!(analyzer.able_to_fuse_on_all_paths(split.d, split.d, &none, &mut memo));
    assert!(analyzer.compute_unfusible_nodes().contains(&split.a));

    // With every node in scope 1, an unfusible intermediate still blocks the fold.
    let same_scope = diamond(Some(1));
    let analyzer = FusibilityAnalyzer::new(&same_scope.graph, &config).expect("acyclic");
    let unfusible = HashSet::from([same_scope.b]);
    let mut memo = Default::default();
    assert!(!analyzer.able_to_fuse_on_all_paths(
        same_scope.a,
        same_scope.d,
        &unfusible,
        &mut memo
    ));
    assert!(analyzer.able_to_fuse_on_all_paths(
        same_scope.a,
        same_scope.c,
        &unfusible,
        &mut memo
    ));
}

/// Scope {P, Q, R} with `P -> O -> Q` through the outside node O and `Q -> R`.
#[test]
fn loop_check_excludes_producer_and_keeps_remaining_scope() {
    let t = tensor();
    let mut builder = GraphBuilder::new("back_edge");
    let x = builder.data("x", t.clone());
    let p = builder
        .op(kernel_op("P", "Relu", 1), &[out0(x)], &t, 1)
        .expect("add P");
    let o = builder
        .op(plain_op("O", "Cast"), &[out0(p)], &t, 1)
        .expect("add O");
    let q = builder
        .op(kernel_op("Q", "Abs", 1), &[out0(o)], &t, 1)
        .expect("add Q");
    let r = builder
        .op(kernel_op("R", "Exp", 1), &[out0(q)], &t, 1)
        .expect("add R");
    builder
        .op(plain_op("y", "NetOutput"), &[out0(r)], &t, 0)
        .expect("add y");
    let graph = builder.finish();
    let config = FusionConfig::default();

    // P has no successor in its own scope, so only the loop check can catch it.
    let mut analyzer = FusibilityAnalyzer::new(&graph, &config).expect("acyclic");
    let unfusible = analyzer.compute_unfusible_nodes();
    assert!(unfusible.is_empty());

    analyzer.absorb(r, 1);
    assert!(!analyzer.check_loop_exist_after_fusion(q, r, 1, 1, &unfusible));
    assert!(analyzer.check_loop_exist_after_fusion(q, r, 2, 1, &unfusible));
    analyzer.absorb(q, 1);
    assert!(analyzer.check_loop_exist_after_fusion(p, r, 1, 1, &unfusible));
    assert!(analyzer.check_loop_exist_after_fusion(p, o, 1, 1, &unfusible));

    let selection = select_scopes(&graph, &config).expect("acyclic");
    assert_eq!(selection.rejected_loop, vec![p]);
    assert_eq!(selection.scopes.get(1), Some(&[q, r][..]));
}

/// `x -> A -> B -> C -> y` in scope 1, with B also read by E outside the scope.
#[test]
fn outside_reader_that_never_returns_does_not_block_fusion() {
    let t = tensor();
    let mut builder = GraphBuilder::new("side_reader");
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
    builder
        .op(plain_op("E", "Identity"), &[out0(b)], &t, 1)
        .expect("add E");
    builder
        .op(plain_op("y", "NetOutput"), &[out0(c)], &t, 0)
        .expect("add y");
    let graph = builder.finish();
    let config = FusionConfig::default();

    let analyzer = FusibilityAnalyzer::new(&graph, &config).expect("acyclic");
    assert!(analyzer.compute_unfusible_nodes().is_empty());

    let selection = select_scopes(&graph, &config).expect("acyclic");
    assert!(selection.rejected_loop.is_empty());
    assert_eq!(selection.scopes.get(1), Some(&[a, b, c][..]));
}

#[test]
fn eligibility_respects_lower_bound_and_exclusion_flags() {
    let config = FusionConfig {
        scope_lower_bound: 10,
        ..FusionConfig::default()
    };
    assert_eq!(eligible_scope(&kernel_op("a", "Relu", 3), &config), None);
    assert_eq!(eligible_scope(&kernel_op("a", "Relu", 12), &config), Some(12));
    assert_eq!(eligible_scope(&kernel_op("a", "Relu", -1), &config), None);
    assert_eq!(eligible_scope(&plain_op("a", "Relu"), &config), None);

    let no_task = kernel_op("a", "Relu", 12).with_attr(attrs::NO_TASK, AttrValue::Bool(true));
    assert_eq!(eligible_scope(&no_task, &config), None);
    let fused =
        kernel_op("a", "Relu", 12).with_attr(attrs::IS_COMPILED_FUSION_OP, AttrValue::Bool(true));
    assert_eq!(eligible_scope(&fused, &config), None);
}

#[test]
fn scopes_below_minimum_size_are_dropped() {
    let t = tensor();
    let mut builder = GraphBuilder::new("singleton");
    let x = builder.data("x", t.clone());
    let lone = builder
        .op(kernel_op("lone", "Relu", 4), &[out0(x)], &t, 1)
        .expect("add lone");
    builder
        .op(plain_op("y", "NetOutput"), &[out0(lone)], &t, 0)
        .expect("add y");
    let graph = builder.finish();

    let selection = select_scopes(&graph, &FusionConfig::default()).expect("acyclic");
    assert_eq!(selection.scopes.get(4), Some(&[lone][..]));
    assert!(selection.dropped_small.is_empty());

    let config = FusionConfig {
        min_scope_size: 2,
        ..FusionConfig::default()
    };
    let selection = select_scopes(&graph, &config).expect("acyclic");
    assert!(selection.scopes.is_empty());
    assert_eq!(selection.dropped_small, vec![4]);
}
