use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde_json::Value;

use plexus_core::{
    ApprovalQueue, CallbackHandler, PlexusError, RunEvent, TaskRouter, TraceEntry,
};
use plexus_graph::{Budget, Graph, Node, NodeKind};

use crate::approval::ApprovalBroker;
use crate::context::NodeResult;

mod approval;
mod conditional;
mod delay;
mod input;
mod loops;
mod merge;
mod output;
mod task;
mod webhook;

/// Read-only snapshot handed to a node executor.
///
/// Executors never touch the live execution context: they see the
/// variables and predecessor results as of admission time and return
/// their effects in a [`NodeOutcome`] for the controller to apply.
#[derive(Clone)]
pub(crate) struct ExecScope {
    pub run_id: String,
    pub graph: Arc<Graph>,
    pub variables: HashMap<String, Value>,
    pub results: HashMap<String, NodeResult>,
    pub router: Arc<dyn TaskRouter>,
    pub queue: Arc<dyn ApprovalQueue>,
    pub broker: Arc<ApprovalBroker>,
    pub callbacks: Arc<Vec<Arc<dyn CallbackHandler>>>,
    pub http: reqwest::Client,
    pub budget: Budget,
    pub spent_cost: f64,
    pub spent_tokens: u64,
    pub cancelled: Arc<AtomicBool>,
}

/// Everything a node execution produced, returned to the controller.
pub(crate) struct NodeOutcome {
    pub output: Value,
    pub writes: Vec<(String, Value)>,
    pub cost: f64,
    pub tokens_used: u64,
    pub quality_score: Option<f64>,
    /// Trace entries from loop body passes, in execution order.
    pub body_trace: Vec<TraceEntry>,
    /// Results of loop body nodes, recorded without re-counting their
    /// cost (already folded into `cost`).
    pub body_results: Vec<NodeResult>,
    pub iterations: u32,
}

impl NodeOutcome {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            writes: Vec::new(),
            cost: 0.0,
            tokens_used: 0,
            quality_score: None,
            body_trace: Vec::new(),
            body_results: Vec::new(),
            iterations: 0,
        }
    }

    pub fn write(mut self, name: impl Into<String>, value: Value) -> Self {
        self.writes.push((name.into(), value));
        self
    }
}

/// Single dispatch point over the closed set of node kinds. Loop
/// bodies re-enter here, hence the boxed future.
pub(crate) fn execute<'a>(
    node: &'a Node,
    scope: &'a ExecScope,
) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, PlexusError>> + Send + 'a>> {
    Box::pin(async move {
        match &node.kind {
            NodeKind::Input(config) => input::run(node, config, scope).await,
            NodeKind::Task(config) => task::run(node, config, scope).await,
            NodeKind::Conditional(config) => conditional::run(node, config, scope).await,
            NodeKind::Loop(config) => loops::run(node, config, scope).await,
            NodeKind::Merge(config) => merge::run(node, config, scope).await,
            NodeKind::Delay(config) => delay::run(node, config, scope).await,
            NodeKind::Webhook(config) => webhook::run(node, config, scope).await,
            NodeKind::Approval(config) => approval::run(node, config, scope).await,
            NodeKind::Output(config) => output::run(node, config, scope).await,
        }
    })
}

/// Deliver an event to every registered callback; callback failures
/// are logged and never affect the run.
pub(crate) async fn emit_event(callbacks: &[Arc<dyn CallbackHandler>], event: RunEvent) {
    for callback in callbacks {
        if let Err(e) = callback.on_event(event.clone()).await {
            tracing::warn!(error = %e, "callback handler failed");
        }
    }
}
