use plexus_graph::{
    Condition, ConditionOperator, GraphBuilder, LoopConfig, Node, NodeKind, TaskConfig,
};
use serde_json::json;

fn task(id: &str) -> Node {
    Node::new(id, NodeKind::Task(TaskConfig::new("test", "do")))
}

fn sample_graph() -> plexus_graph::Graph {
    GraphBuilder::new("g")
        .add_node(task("a"))
        .add_node(task("b").depends_on(["a"]))
        .add_node(task("c").depends_on(["a"]))
        .add_conditional_edge(
            "a",
            "b",
            Condition::new("go", ConditionOperator::Equals, json!(true)),
        )
        .build()
        .unwrap()
}

#[test]
fn renders_mermaid_header_and_nodes() {
    let rendered = sample_graph().draw_mermaid();
    assert!(rendered.starts_with("graph TD"));
    assert!(rendered.contains(r#"a["a (task)"]"#));
    assert!(rendered.contains(r#"b["b (task)"]"#));
}

#[test]
fn dependencies_render_as_solid_arrows() {
    let rendered = sample_graph().draw_mermaid();
    assert!(rendered.contains("a --> b"));
    assert!(rendered.contains("a --> c"));
}

#[test]
fn conditional_edges_render_dashed_with_label() {
    let rendered = sample_graph().draw_mermaid();
    assert!(
        rendered.contains("a -.->|go Equals| b"),
        "got:\n{rendered}"
    );
}

#[test]
fn loop_bodies_render_membership_links() {
    let graph = GraphBuilder::new("g")
        .add_node(task("body"))
        .add_node(Node::new("repeat", NodeKind::Loop(LoopConfig::new(["body"], 2))))
        .build()
        .unwrap();
    let rendered = graph.draw_mermaid();
    assert!(rendered.contains("repeat -.- body"));
}

#[test]
fn rendering_is_deterministic() {
    let graph = sample_graph();
    assert_eq!(graph.draw_mermaid(), graph.draw_mermaid());
}

#[test]
fn save_mermaid_writes_the_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.mmd");
    let graph = sample_graph();
    graph.save_mermaid(&path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, graph.draw_mermaid());
}
