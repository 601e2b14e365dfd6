use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use plexus_core::{
    NodeStatus, PlexusError, RouteRequest, RouteResponse, RunStatus, TaskRouter, TokenUsage,
};
use plexus_engine::{Engine, RunOptions};
use plexus_graph::{
    Condition, ConditionOperator, ConditionalConfig, GraphBuilder, InputConfig, Node, NodeKind,
    OutputConfig, OutputFormat, TaskConfig, VariableSpec, VariableType,
};
use plexus_store::{InMemoryRunStore, StoredRun};

/// Router that echoes the interpolated content back.
struct EchoRouter;

#[async_trait]
impl TaskRouter for EchoRouter {
    async fn route(&self, request: RouteRequest) -> Result<RouteResponse, PlexusError> {
        Ok(RouteResponse {
            output: json!(format!("echo: {}", request.content)),
            cost: 0.1,
            tokens_used: TokenUsage::new(5, 5),
            success: true,
            quality_score: None,
        })
    }
}

fn engine_with(store: Arc<InMemoryRunStore>) -> Engine {
    Engine::builder(Arc::new(EchoRouter)).store(store).build()
}

async fn wait_terminal(store: &InMemoryRunStore, run_id: &str) -> StoredRun {
    for _ in 0..500 {
        if let Some(run) = store.get_run(run_id).await {
            if run.status.is_terminal() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run '{run_id}' did not reach a terminal state");
}

fn branch_graph() -> Arc<plexus_graph::Graph> {
    Arc::new(
        GraphBuilder::new("branch")
            .declare_variable("score", VariableSpec::new(VariableType::Number).required())
            .add_node(Node::new("intake", NodeKind::Input(InputConfig::new())))
            .add_node(
                Node::new(
                    "task_a",
                    NodeKind::Task(TaskConfig::new("assess", "assess {{score}}")),
                )
                .depends_on(["intake"]),
            )
            .add_node(
                Node::new(
                    "check",
                    NodeKind::Conditional(ConditionalConfig::new(vec![Condition::new(
                        "score",
                        ConditionOperator::GreaterThan,
                        json!(10),
                    )])),
                )
                .depends_on(["task_a"]),
            )
            .add_node(
                Node::new(
                    "task_b",
                    NodeKind::Task(TaskConfig::new("respond", "high road {{score}}")),
                )
                .depends_on(["check"]),
            )
            .add_node(
                Node::new(
                    "task_c",
                    NodeKind::Task(TaskConfig::new("respond", "low road {{score}}")),
                )
                .depends_on(["check"]),
            )
            .add_node(
                Node::new("final", NodeKind::Output(OutputConfig::new(OutputFormat::Json)))
                    .depends_on(["task_b", "task_c"]),
            )
            .add_conditional_edge(
                "check",
                "task_b",
                Condition::new("check_result", ConditionOperator::Equals, json!(true)),
            )
            .add_conditional_edge(
                "check",
                "task_c",
                Condition::new("check_result", ConditionOperator::Equals, json!(false)),
            )
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn branch_scenario_takes_the_true_path() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let run_id = engine
        .execute_graph(
            branch_graph(),
            HashMap::from([("score".to_string(), json!(20))]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);

    // Output node forwards task_b's result.
    assert_eq!(run.output, Some(json!("echo: high road 20")));

    let statuses: HashMap<String, NodeStatus> = run
        .trace
        .iter()
        .map(|entry| (entry.node_id.clone(), entry.status))
        .collect();
    assert_eq!(statuses.get("task_b"), Some(&NodeStatus::Completed));
    assert_eq!(statuses.get("task_c"), Some(&NodeStatus::Skipped));
    assert!(!run
        .trace
        .iter()
        .any(|entry| entry.node_id == "task_c" && entry.status == NodeStatus::Completed));
}

#[tokio::test]
async fn branch_scenario_takes_the_false_path() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let run_id = engine
        .execute_graph(
            branch_graph(),
            HashMap::from([("score".to_string(), json!(5))]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output, Some(json!("echo: low road 5")));
}

#[tokio::test]
async fn trace_order_respects_dependencies() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let run_id = engine
        .execute_graph(
            branch_graph(),
            HashMap::from([("score".to_string(), json!(20))]),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    let graph = branch_graph();

    let position_of = |node_id: &str| {
        run.trace
            .iter()
            .position(|entry| {
                entry.node_id == node_id
                    && matches!(entry.status, NodeStatus::Completed | NodeStatus::Skipped)
            })
            .unwrap_or(usize::MAX)
    };

    for entry in run
        .trace
        .iter()
        .filter(|entry| entry.status == NodeStatus::Completed)
    {
        let Some(node) = graph.node(&entry.node_id) else {
            continue;
        };
        let own = position_of(&entry.node_id);
        for dep in &node.dependencies {
            assert!(
                position_of(dep) < own,
                "'{dep}' should settle before '{}'",
                entry.node_id
            );
        }
    }
}

#[tokio::test]
async fn missing_required_variable_fails_the_run() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let run_id = engine
        .execute_graph(branch_graph(), HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().expect("failed run must carry an error");
    assert!(error.contains("missing required variable"), "got: {error}");
}

#[tokio::test]
async fn no_output_node_falls_back_to_last_result() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let graph = Arc::new(
        GraphBuilder::new("plain")
            .add_node(Node::new(
                "first",
                NodeKind::Task(TaskConfig::new("step", "one")),
            ))
            .add_node(
                Node::new("second", NodeKind::Task(TaskConfig::new("step", "two")))
                    .depends_on(["first"]),
            )
            .build()
            .unwrap(),
    );

    let run_id = engine
        .execute_graph(graph, HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output, Some(json!("echo: two")));
}

#[tokio::test]
async fn multiple_output_nodes_key_by_name() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let graph = Arc::new(
        GraphBuilder::new("two-outputs")
            .add_node(Node::new(
                "work",
                NodeKind::Task(TaskConfig::new("step", "payload")),
            ))
            .add_node(
                Node::new("as_json", NodeKind::Output(OutputConfig::new(OutputFormat::Json)))
                    .named("json_view")
                    .depends_on(["work"]),
            )
            .add_node(
                Node::new("as_text", NodeKind::Output(OutputConfig::new(OutputFormat::Text)))
                    .named("text_view")
                    .depends_on(["work"]),
            )
            .build()
            .unwrap(),
    );

    let run_id = engine
        .execute_graph(graph, HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    let output = run.output.expect("completed run should carry output");
    assert_eq!(output["json_view"], json!("echo: payload"));
    assert_eq!(output["text_view"], json!("echo: payload"));
}

#[tokio::test]
async fn hand_assembled_invalid_graph_fails_synchronously() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    // Bypass the builder to sneak in a dangling edge.
    let mut graph = (*branch_graph()).clone();
    graph.edges.push(plexus_graph::Edge::new("check", "ghost"));

    let err = engine
        .execute_graph(Arc::new(graph), HashMap::new(), RunOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation(), "got: {err}");
    assert_eq!(store.run_count().await, 0, "no run record on validation failure");
}

#[tokio::test]
async fn structured_output_carries_run_metadata() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(store.clone());

    let graph = Arc::new(
        GraphBuilder::new("structured")
            .add_node(Node::new(
                "work",
                NodeKind::Task(TaskConfig::new("step", "payload")),
            ))
            .add_node(
                Node::new(
                    "final",
                    NodeKind::Output(OutputConfig::new(OutputFormat::Structured)),
                )
                .depends_on(["work"]),
            )
            .build()
            .unwrap(),
    );

    let run_id = engine
        .execute_graph(graph, HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    let output = run.output.expect("completed run should carry output");
    assert_eq!(output["output"], json!("echo: payload"));
    assert_eq!(output["run_id"], json!(run_id));
    assert!(output["cost"].as_f64().unwrap() > 0.0);
}
