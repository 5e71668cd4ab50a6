mod support;

use rlscheck::graph::{build_graph, detect_cycles, DependencyGraph, GraphError};

#[test]
fn fixture_graph_lists_both_subquery_edges() {
    let (_, policies) = support::load_fixture("policy_cycle");
    let edges = build_graph(&policies).to_edge_list();
    assert!(edges.starts_with("# source\ttarget\tpolicy\n"), "{edges}");
    assert!(edges.contains("documents\tmemberships\tmember_documents\n"));
    assert!(edges.contains("memberships\tdocuments\tvisible_documents\n"));
}

#[test]
fn exported_graphs_reimport_unchanged() {
    for fixture in ["policy_cycle", "tenant_leak", "clean"] {
        let (_, policies) = support::load_fixture(fixture);
        let graph = build_graph(&policies);

        let from_edges = DependencyGraph::from_edge_list(&graph.to_edge_list())
            .unwrap_or_else(|e| panic!("{fixture} edge list should parse: {e}"));
        assert_eq!(from_edges, graph, "{fixture} edge list round-trip");

        let from_json = DependencyGraph::from_json(&graph.to_json())
            .unwrap_or_else(|e| panic!("{fixture} json should parse: {e}"));
        assert_eq!(from_json, graph, "{fixture} json round-trip");
    }
}

#[test]
fn tables_without_subqueries_survive_as_isolated_nodes() {
    let (_, policies) = support::load_fixture("clean");
    let graph = build_graph(&policies);
    assert!(graph.edges().is_empty());
    assert!(graph.nodes().contains("articles"));
    assert!(graph.to_edge_list().contains("\narticles\n"));
}

#[test]
fn cycle_detection_is_stable_across_export_and_reruns() {
    let (_, policies) = support::load_fixture("policy_cycle");
    let graph = build_graph(&policies);
    let first = detect_cycles(&graph);
    assert_eq!(first.len(), 1);
    assert_eq!(detect_cycles(&graph), first);

    let reimported =
        DependencyGraph::from_edge_list(&graph.to_edge_list()).expect("edge list should parse");
    assert_eq!(detect_cycles(&reimported), first);
    assert_eq!(first[0].describe(), "documents -> memberships -> documents");
}

#[test]
fn malformed_edge_lines_report_their_position() {
    let err = DependencyGraph::from_edge_list("# header\ndocuments\tmemberships\n")
        .expect_err("two fields should be rejected");
    assert_eq!(err, GraphError::MalformedLine { line: 2, fields: 2 });

    let err = DependencyGraph::from_json("{\"nodes\": 3}").expect_err("bad json should fail");
    assert!(matches!(err, GraphError::Json(_)));
}
