use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use plexus_core::{
    NodeStatus, PlexusError, RouteRequest, RouteResponse, RunStatus, TaskRouter, TokenUsage,
};
use plexus_engine::{Engine, RunOptions};
use plexus_graph::{
    Budget, Condition, ConditionOperator, GraphBuilder, LoopConfig, Node, NodeKind, TaskConfig,
};
use plexus_store::{InMemoryRunStore, StoredRun};

struct EchoRouter {
    cost: f64,
}

#[async_trait]
impl TaskRouter for EchoRouter {
    async fn route(&self, request: RouteRequest) -> Result<RouteResponse, PlexusError> {
        Ok(RouteResponse {
            output: json!(request.content),
            cost: self.cost,
            tokens_used: TokenUsage::new(2, 2),
            success: true,
            quality_score: None,
        })
    }
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

fn loop_graph(config: LoopConfig) -> Arc<plexus_graph::Graph> {
    Arc::new(
        GraphBuilder::new("looped")
            .add_node(Node::new(
                "body",
                NodeKind::Task(TaskConfig::new("step", "pass {{_iteration}}")),
            ))
            .add_node(Node::new("repeat", NodeKind::Loop(config)))
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn five_passes_produce_five_body_entries() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(EchoRouter { cost: 0.0 }))
        .store(store.clone())
        .build();

    let run_id = engine
        .execute_graph(
            loop_graph(LoopConfig::new(["body"], 5)),
            HashMap::new(),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);

    let body_entries: Vec<_> = run
        .trace
        .iter()
        .filter(|entry| entry.node_id == "body" && entry.status == NodeStatus::Completed)
        .collect();
    assert_eq!(body_entries.len(), 5);

    // Passes see a fresh `_iteration` each time.
    assert_eq!(body_entries[0].output, json!("pass 0"));
    assert_eq!(body_entries[4].output, json!("pass 4"));

    let loop_entry = run
        .trace
        .iter()
        .find(|entry| entry.node_id == "repeat" && entry.status == NodeStatus::Completed)
        .expect("loop node should complete");
    assert_eq!(loop_entry.output, json!({ "iterations": 5 }));
}

#[tokio::test]
async fn break_condition_stops_early() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(EchoRouter { cost: 0.0 }))
        .store(store.clone())
        .build();

    let config = LoopConfig::new(["body"], 10).break_when(vec![Condition::new(
        "_iteration",
        ConditionOperator::GreaterThan,
        json!(1),
    )]);
    let run_id = engine
        .execute_graph(loop_graph(config), HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);

    // Breaks after the pass with `_iteration` = 2.
    let body_count = run
        .trace
        .iter()
        .filter(|entry| entry.node_id == "body" && entry.status == NodeStatus::Completed)
        .count();
    assert_eq!(body_count, 3);
}

#[tokio::test]
async fn loop_cost_counts_against_the_budget() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(EchoRouter { cost: 0.4 }))
        .store(store.clone())
        .build();

    let graph = Arc::new(
        GraphBuilder::new("looped")
            .add_node(Node::new(
                "body",
                NodeKind::Task(TaskConfig::new("step", "pass {{_iteration}}")),
            ))
            .add_node(Node::new("repeat", NodeKind::Loop(LoopConfig::new(["body"], 10))))
            .with_budget(Budget::default().with_max_cost(1.0))
            .build()
            .unwrap(),
    );

    let run_id = engine
        .execute_graph(graph, HashMap::new(), RunOptions::default())
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().expect("failed run must carry an error");
    assert!(error.contains("budget exceeded"), "got: {error}");
}

#[tokio::test]
async fn downstream_of_loop_sees_body_results() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(EchoRouter { cost: 0.0 }))
        .store(store.clone())
        .build();

    let graph = Arc::new(
        GraphBuilder::new("looped")
            .add_node(Node::new(
                "body",
                NodeKind::Task(TaskConfig::new("step", "pass {{_iteration}}")),
            ))
            .add_node(Node::new("repeat", NodeKind::Loop(LoopConfig::new(["body"], 2))))
            .add_node(
                Node::new(
                    "after",
                    NodeKind::Task(TaskConfig::new("step", "done after {{_iteration}}")),
                )
                .depends_on(["repeat"]),
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

    // The loop's variable writes are visible downstream.
    let after = run
        .trace
        .iter()
        .find(|entry| entry.node_id == "after" && entry.status == NodeStatus::Completed)
        .expect("after should complete");
    assert_eq!(after.output, json!("done after 1"));
}
