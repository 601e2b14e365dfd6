use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use plexus_core::{
    NodeStatus, PlexusError, RouteRequest, RouteResponse, RunStatus, TaskRouter, TokenUsage,
};
use plexus_engine::{Engine, RunOptions};
use plexus_graph::{Budget, GraphBuilder, Node, NodeKind, TaskConfig};
use plexus_store::{InMemoryRunStore, StoredRun};

/// Router with a fixed per-call price.
struct PricedRouter {
    cost: f64,
    tokens: u32,
}

#[async_trait]
impl TaskRouter for PricedRouter {
    async fn route(&self, request: RouteRequest) -> Result<RouteResponse, PlexusError> {
        Ok(RouteResponse {
            output: json!(request.content),
            cost: self.cost,
            tokens_used: TokenUsage::new(self.tokens, 0),
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

fn chain(budget: Budget) -> Arc<plexus_graph::Graph> {
    Arc::new(
        GraphBuilder::new("chain")
            .add_node(Node::new("a", NodeKind::Task(TaskConfig::new("step", "a"))))
            .add_node(Node::new("b", NodeKind::Task(TaskConfig::new("step", "b"))).depends_on(["a"]))
            .add_node(Node::new("c", NodeKind::Task(TaskConfig::new("step", "c"))).depends_on(["b"]))
            .with_budget(budget)
            .build()
            .unwrap(),
    )
}

fn completed(run: &StoredRun, node_id: &str) -> bool {
    run.trace
        .iter()
        .any(|entry| entry.node_id == node_id && entry.status == NodeStatus::Completed)
}

#[tokio::test]
async fn cost_budget_aborts_after_the_breaching_node() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(PricedRouter { cost: 0.6, tokens: 10 }))
        .store(store.clone())
        .build();

    let run_id = engine
        .execute_graph(
            chain(Budget::default().with_max_cost(1.0)),
            HashMap::new(),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().expect("failed run must carry an error");
    assert!(error.contains("budget exceeded"), "got: {error}");

    // a (0.6) passes, b (1.2) breaches, c never executes.
    assert!(completed(&run, "a"));
    assert!(completed(&run, "b"));
    assert!(!completed(&run, "c"));
    assert!(
        !run.trace
            .iter()
            .any(|entry| entry.node_id == "c" && entry.status == NodeStatus::Failed),
        "c is skipped, not failed"
    );
}

#[tokio::test]
async fn node_past_the_limit_never_runs() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(PricedRouter { cost: 0.6, tokens: 10 }))
        .store(store.clone())
        .build();

    let run_id = engine
        .execute_graph(
            chain(Budget::default().with_max_cost(0.5)),
            HashMap::new(),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(completed(&run, "a"));
    assert!(!completed(&run, "b"));
    assert!(!completed(&run, "c"));
}

#[tokio::test]
async fn token_budget_aborts_the_run() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(PricedRouter { cost: 0.0, tokens: 40 }))
        .store(store.clone())
        .build();

    let run_id = engine
        .execute_graph(
            chain(Budget::default().with_max_tokens(50)),
            HashMap::new(),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.as_ref().expect("failed run must carry an error");
    assert!(error.contains("tokens"), "got: {error}");
    assert!(!completed(&run, "c"));
}

#[tokio::test]
async fn run_options_budget_overrides_the_graph() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(PricedRouter { cost: 0.6, tokens: 10 }))
        .store(store.clone())
        .build();

    // Graph allows 10.0; the caller clamps to 0.5.
    let run_id = engine
        .execute_graph(
            chain(Budget::default().with_max_cost(10.0)),
            HashMap::new(),
            RunOptions::default().with_budget(Budget::default().with_max_cost(0.5)),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!completed(&run, "b"));
}

#[tokio::test]
async fn unlimited_budget_completes() {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(PricedRouter { cost: 0.6, tokens: 10 }))
        .store(store.clone())
        .build();

    let run_id = engine
        .execute_graph(
            chain(Budget::unlimited()),
            HashMap::new(),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let run = wait_terminal(&store, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(completed(&run, "c"));
}
