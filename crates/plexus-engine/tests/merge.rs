use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use plexus_core::{PlexusError, RouteRequest, RouteResponse, RunStatus, TaskRouter, TokenUsage};
use plexus_engine::{Engine, RunOptions};
use plexus_graph::{GraphBuilder, MergeConfig, MergeStrategy, Node, NodeKind, TaskConfig};
use plexus_store::{InMemoryRunStore, StoredRun};

/// Echoes task content; summarize requests get a canned summary, and
/// quality scores come from a per-content table.
struct ScriptedRouter {
    quality: HashMap<String, f64>,
}

impl ScriptedRouter {
    fn new() -> Self {
        Self {
            quality: HashMap::new(),
        }
    }

    fn with_quality(mut self, content: &str, score: f64) -> Self {
        self.quality.insert(content.to_string(), score);
        self
    }
}

#[async_trait]
impl TaskRouter for ScriptedRouter {
    async fn route(&self, request: RouteRequest) -> Result<RouteResponse, PlexusError> {
        let output = if request.task_type == "summarize" {
            json!(format!("summary of {} chars", request.content.len()))
        } else {
            json!(request.content)
        };
        Ok(RouteResponse {
            output,
            cost: 0.05,
            tokens_used: TokenUsage::new(3, 3),
            success: true,
            quality_score: self.quality.get(&request.content).copied(),
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

/// Three producers feeding one merge node.
fn fan_in(strategy: MergeStrategy, outputs: [&str; 3]) -> Arc<plexus_graph::Graph> {
    Arc::new(
        GraphBuilder::new("fan-in")
            .add_node(Node::new("p1", NodeKind::Task(TaskConfig::new("produce", outputs[0]))))
            .add_node(Node::new("p2", NodeKind::Task(TaskConfig::new("produce", outputs[1]))))
            .add_node(Node::new("p3", NodeKind::Task(TaskConfig::new("produce", outputs[2]))))
            .add_node(
                Node::new("merged", NodeKind::Merge(MergeConfig::new(strategy)))
                    .depends_on(["p1", "p2", "p3"]),
            )
            .build()
            .unwrap(),
    )
}

async fn run_fan_in(router: ScriptedRouter, graph: Arc<plexus_graph::Graph>) -> StoredRun {
    let store = Arc::new(InMemoryRunStore::new());
    let engine = Engine::builder(Arc::new(router)).store(store.clone()).build();
    let run_id = engine
        .execute_graph(graph, HashMap::new(), RunOptions::default())
        .await
        .unwrap();
    wait_terminal(&store, &run_id).await
}

#[tokio::test]
async fn vote_picks_the_majority() {
    let run = run_fan_in(
        ScriptedRouter::new(),
        fan_in(MergeStrategy::Vote, ["a", "a", "b"]),
    )
    .await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output, Some(json!("a")));
}

#[tokio::test]
async fn vote_tie_goes_to_first_seen() {
    let run = run_fan_in(
        ScriptedRouter::new(),
        fan_in(MergeStrategy::Vote, ["x", "y", "z"]),
    )
    .await;
    assert_eq!(run.output, Some(json!("x")));
}

#[tokio::test]
async fn concatenate_joins_in_dependency_order() {
    let run = run_fan_in(
        ScriptedRouter::new(),
        fan_in(MergeStrategy::Concatenate, ["one", "two", "three"]),
    )
    .await;
    assert_eq!(run.output, Some(json!("one\ntwo\nthree")));
}

#[tokio::test]
async fn best_quality_picks_the_highest_score() {
    let router = ScriptedRouter::new()
        .with_quality("one", 0.2)
        .with_quality("two", 0.9)
        .with_quality("three", 0.4);
    let run = run_fan_in(router, fan_in(MergeStrategy::BestQuality, ["one", "two", "three"])).await;
    assert_eq!(run.output, Some(json!("two")));
}

#[tokio::test]
async fn best_quality_without_scores_falls_back_to_first() {
    let run = run_fan_in(
        ScriptedRouter::new(),
        fan_in(MergeStrategy::BestQuality, ["one", "two", "three"]),
    )
    .await;
    assert_eq!(run.output, Some(json!("one")));
}

#[tokio::test]
async fn summarize_delegates_to_the_router() {
    let run = run_fan_in(
        ScriptedRouter::new(),
        fan_in(MergeStrategy::Summarize, ["one", "two", "three"]),
    )
    .await;
    assert_eq!(run.status, RunStatus::Completed);
    let output = run.output.expect("completed run should carry output");
    assert!(
        output.as_str().unwrap_or_default().starts_with("summary of"),
        "got: {output}"
    );
}
