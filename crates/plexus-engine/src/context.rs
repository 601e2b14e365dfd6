use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use plexus_core::TraceEntry;
use plexus_graph::Graph;

/// The recorded result of one completed node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node_id: String,
    pub output: Value,
    pub cost: f64,
    pub tokens_used: u64,
    pub quality_score: Option<f64>,
    pub elapsed_ms: u64,
}

/// Per-run mutable state, owned exclusively by the run controller
/// task for the lifetime of one run.
///
/// Node executors never hold a reference to this: they receive
/// snapshots of `variables`/`node_results` and hand their writes back
/// as part of their outcome, which the controller applies. That makes
/// the controller the single mutating authority.
pub struct ExecutionContext {
    pub run_id: String,
    pub graph_id: String,
    variables: HashMap<String, Value>,
    node_results: HashMap<String, NodeResult>,
    visited: HashSet<String>,
    failed: HashSet<String>,
    skipped: HashSet<String>,
    iteration_counts: HashMap<String, u32>,
    cost: f64,
    tokens_used: u64,
    cancelled: Arc<AtomicBool>,
    started_at: Instant,
    trace: Vec<TraceEntry>,
}

impl ExecutionContext {
    /// Seed a fresh context from graph-declared defaults overlaid
    /// with the caller's input.
    pub fn new(run_id: impl Into<String>, graph: &Graph, input: HashMap<String, Value>) -> Self {
        let mut variables = HashMap::new();
        for (name, spec) in &graph.variables {
            if let Some(default) = &spec.default {
                variables.insert(name.clone(), default.clone());
            }
        }
        variables.extend(input);

        Self {
            run_id: run_id.into(),
            graph_id: graph.id.clone(),
            variables,
            node_results: HashMap::new(),
            visited: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
            iteration_counts: HashMap::new(),
            cost: 0.0,
            tokens_used: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            trace: Vec::new(),
        }
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn node_results(&self) -> &HashMap<String, NodeResult> {
        &self.node_results
    }

    pub fn snapshot_variables(&self) -> HashMap<String, Value> {
        self.variables.clone()
    }

    pub fn snapshot_results(&self) -> HashMap<String, NodeResult> {
        self.node_results.clone()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn record_result(&mut self, result: NodeResult) {
        self.cost += result.cost;
        self.tokens_used += result.tokens_used;
        self.visited.insert(result.node_id.clone());
        self.node_results.insert(result.node_id.clone(), result);
    }

    /// Record a result whose cost was already accumulated elsewhere
    /// (loop body nodes fold into their loop's totals).
    pub fn adopt_result(&mut self, result: NodeResult) {
        self.visited.insert(result.node_id.clone());
        self.node_results.insert(result.node_id.clone(), result);
    }

    pub fn record_failure(&mut self, node_id: impl Into<String>) {
        self.failed.insert(node_id.into());
    }

    pub fn mark_skipped(&mut self, node_id: impl Into<String>) {
        self.skipped.insert(node_id.into());
    }

    pub fn record_iterations(&mut self, node_id: impl Into<String>, iterations: u32) {
        self.iteration_counts.insert(node_id.into(), iterations);
    }

    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    pub fn failed(&self) -> &HashSet<String> {
        &self.failed
    }

    pub fn skipped(&self) -> &HashSet<String> {
        &self.skipped
    }

    pub fn iteration_count(&self, node_id: &str) -> u32 {
        self.iteration_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Fraction of nodes in a terminal per-node state.
    pub fn progress(&self, total_nodes: usize) -> f32 {
        if total_nodes == 0 {
            return 1.0;
        }
        let settled = self.visited.len() + self.failed.len() + self.skipped.len();
        (settled as f32 / total_nodes as f32).min(1.0)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn push_trace(&mut self, entry: TraceEntry) {
        self.trace.push(entry);
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }
}
