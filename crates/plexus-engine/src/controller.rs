use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use plexus_core::{
    ApprovalQueue, CallbackHandler, NodeStatus, PlexusError, RunEvent, RunStatus, RunStore,
    TaskRouter, TraceEntry,
};
use plexus_graph::{render_template, Budget, Graph, Node, NodeKind};

use crate::approval::ApprovalBroker;
use crate::context::{ExecutionContext, NodeResult};
use crate::executors::{emit_event, execute, ExecScope, NodeOutcome};
use crate::scheduler::Scheduler;

/// Externally visible snapshot of a run, published through the
/// engine's watch channel and the run store.
#[derive(Debug, Clone)]
pub struct RunStatusUpdate {
    pub status: RunStatus,
    pub progress: f32,
    pub output: Option<Value>,
    pub error: Option<String>,
}

/// Drives one run end to end: scheduler ticks, concurrent node
/// execution, error policy, budget/timeout/cancellation, trace and
/// status persistence.
///
/// The controller task owns the [`ExecutionContext`]; node tasks get
/// snapshots and report back through the join set.
pub(crate) struct RunController {
    pub graph: Arc<Graph>,
    pub ctx: ExecutionContext,
    pub scheduler: Scheduler,
    pub router: Arc<dyn TaskRouter>,
    pub store: Arc<dyn RunStore>,
    pub queue: Arc<dyn ApprovalQueue>,
    pub broker: Arc<ApprovalBroker>,
    pub callbacks: Arc<Vec<Arc<dyn CallbackHandler>>>,
    pub http: reqwest::Client,
    pub budget: Budget,
    pub deadline: Option<Instant>,
    pub status_tx: watch::Sender<RunStatusUpdate>,
}

/// What one node task hands back to the controller.
struct TaskReport {
    node_id: String,
    entries: Vec<TraceEntry>,
    result: Result<NodeOutcome, PlexusError>,
    attempts: u32,
    elapsed_ms: u64,
}

impl RunController {
    pub(crate) async fn run(mut self) {
        let run_id = self.ctx.run_id.clone();
        info!(run_id = %run_id, graph_id = %self.graph.id, "run started");
        emit_event(
            &self.callbacks,
            RunEvent::RunStarted {
                run_id: run_id.clone(),
                graph_id: self.graph.id.clone(),
            },
        )
        .await;
        self.publish(RunStatus::Running, None, None).await;

        let verdict = self.drive().await;

        // Anything never reached is skipped, not failed.
        let unreached: Vec<String> = self
            .graph
            .node_order
            .iter()
            .filter(|id| {
                !self.ctx.visited().contains(*id)
                    && !self.ctx.failed().contains(*id)
                    && !self.ctx.skipped().contains(*id)
            })
            .cloned()
            .collect();
        for node_id in &unreached {
            self.ctx.mark_skipped(node_id.clone());
        }
        self.record_skips(unreached).await;

        match verdict {
            Ok(output) => {
                info!(
                    run_id = %run_id,
                    cost = self.ctx.cost(),
                    tokens = self.ctx.tokens_used(),
                    elapsed_ms = self.ctx.elapsed_ms(),
                    "run completed"
                );
                emit_event(
                    &self.callbacks,
                    RunEvent::RunFinished {
                        run_id: run_id.clone(),
                        output: output.clone(),
                    },
                )
                .await;
                self.publish(RunStatus::Completed, Some(output), None).await;
            }
            Err(PlexusError::Cancelled) => {
                info!(run_id = %run_id, "run cancelled");
                emit_event(
                    &self.callbacks,
                    RunEvent::RunCancelled {
                        run_id: run_id.clone(),
                    },
                )
                .await;
                self.publish(
                    RunStatus::Cancelled,
                    None,
                    Some("run cancelled".to_string()),
                )
                .await;
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "run failed");
                emit_event(
                    &self.callbacks,
                    RunEvent::RunFailed {
                        run_id: run_id.clone(),
                        error: e.to_string(),
                    },
                )
                .await;
                self.publish(RunStatus::Failed, None, Some(e.to_string())).await;
            }
        }
    }

    /// The batch loop. Returns the final output on exhaustion, or the
    /// error that aborted the run.
    async fn drive(&mut self) -> Result<Value, PlexusError> {
        loop {
            if self.ctx.is_cancelled() {
                return Err(PlexusError::Cancelled);
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(PlexusError::Timeout(format!(
                        "run exceeded its deadline after {}ms",
                        self.ctx.elapsed_ms()
                    )));
                }
            }

            let batch = self.scheduler.next_batch(&self.graph);
            if batch.is_empty() {
                return Ok(self.final_output());
            }

            let mut join_set: JoinSet<TaskReport> = JoinSet::new();
            for node_id in batch {
                let Some(node) = self.graph.node(&node_id) else {
                    continue;
                };
                debug!(
                    run_id = %self.ctx.run_id,
                    node_id = %node.id,
                    kind = node.kind.label(),
                    "node admitted"
                );
                emit_event(
                    &self.callbacks,
                    RunEvent::NodeStarted {
                        run_id: self.ctx.run_id.clone(),
                        node_id: node.id.clone(),
                    },
                )
                .await;
                let node = node.clone();
                let scope = self.scope();
                join_set.spawn(run_node(node, scope));
            }

            while let Some(joined) = join_set.join_next().await {
                let report = match joined {
                    Ok(report) => report,
                    Err(e) => {
                        error!(run_id = %self.ctx.run_id, error = %e, "node task join error");
                        self.drain(&mut join_set).await;
                        return Err(PlexusError::NodeExecution {
                            node: "unknown".to_string(),
                            message: format!("node task did not complete: {e}"),
                        });
                    }
                };
                if let Err(abort) = self.apply_report(report, true).await {
                    // Let in-flight siblings finish and record them,
                    // but chain nothing further.
                    self.drain(&mut join_set).await;
                    return Err(abort);
                }
            }
        }
    }

    /// Record a report. When `chain` is set, failures consult the
    /// node's error policy and successes trigger budget checks and
    /// rescheduling; a returned error aborts the run.
    async fn apply_report(
        &mut self,
        report: TaskReport,
        chain: bool,
    ) -> Result<(), PlexusError> {
        self.scheduler.settle(&report.node_id);
        for entry in &report.entries {
            self.ctx.push_trace(entry.clone());
            if let Err(e) = self.store.append_trace(&self.ctx.run_id, entry).await {
                warn!(run_id = %self.ctx.run_id, error = %e, "failed to persist trace entry");
            }
        }

        match report.result {
            Ok(outcome) => {
                for (name, value) in outcome.writes {
                    self.ctx.set_variable(name, value);
                }
                for body_result in outcome.body_results {
                    self.ctx.adopt_result(body_result);
                }
                if outcome.iterations > 0 {
                    self.ctx
                        .record_iterations(report.node_id.clone(), outcome.iterations);
                }
                self.ctx.record_result(NodeResult {
                    node_id: report.node_id.clone(),
                    output: outcome.output,
                    cost: outcome.cost,
                    tokens_used: outcome.tokens_used,
                    quality_score: outcome.quality_score,
                    elapsed_ms: report.elapsed_ms,
                });
                emit_event(
                    &self.callbacks,
                    RunEvent::NodeFinished {
                        run_id: self.ctx.run_id.clone(),
                        node_id: report.node_id.clone(),
                        status: NodeStatus::Completed,
                        attempts: report.attempts,
                    },
                )
                .await;
                if !chain {
                    return Ok(());
                }
                if let Some(breach) = self.budget_breach() {
                    return Err(breach);
                }
                self.publish(RunStatus::Running, None, None).await;
                let skipped = self.scheduler.reschedule(&self.graph, &mut self.ctx);
                self.record_skips(skipped).await;
                Ok(())
            }
            Err(e) => {
                self.ctx.record_failure(report.node_id.clone());
                emit_event(
                    &self.callbacks,
                    RunEvent::NodeFinished {
                        run_id: self.ctx.run_id.clone(),
                        node_id: report.node_id.clone(),
                        status: NodeStatus::Failed,
                        attempts: report.attempts,
                    },
                )
                .await;
                warn!(
                    run_id = %self.ctx.run_id,
                    node_id = %report.node_id,
                    attempts = report.attempts,
                    error = %e,
                    "node failed"
                );
                if !chain {
                    return Ok(());
                }
                if e.is_fatal() {
                    return Err(e);
                }

                let policy = self
                    .graph
                    .node(&report.node_id)
                    .map(|node| node.error_policy.clone())
                    .unwrap_or_default();
                if let Some(fallback) = policy.fallback_node {
                    info!(
                        run_id = %self.ctx.run_id,
                        node_id = %report.node_id,
                        fallback = %fallback,
                        "scheduling fallback node"
                    );
                    self.scheduler.force_ready(&self.graph, &self.ctx, &fallback);
                    self.publish(RunStatus::Running, None, None).await;
                    let skipped = self.scheduler.reschedule(&self.graph, &mut self.ctx);
                    self.record_skips(skipped).await;
                    Ok(())
                } else if policy.continue_on_error {
                    self.publish(RunStatus::Running, None, None).await;
                    let skipped = self.scheduler.reschedule(&self.graph, &mut self.ctx);
                    self.record_skips(skipped).await;
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Trace and announce nodes the scheduler just marked skipped.
    async fn record_skips(&mut self, skipped: Vec<String>) {
        for node_id in skipped {
            let entry = TraceEntry {
                node_id: node_id.clone(),
                attempt: 0,
                input: Value::Null,
                output: Value::Null,
                status: NodeStatus::Skipped,
                duration_ms: 0,
                cost: 0.0,
                tokens_used: 0,
                timestamp: Utc::now(),
                error: None,
            };
            self.ctx.push_trace(entry.clone());
            if let Err(e) = self.store.append_trace(&self.ctx.run_id, &entry).await {
                warn!(run_id = %self.ctx.run_id, error = %e, "failed to persist trace entry");
            }
            debug!(run_id = %self.ctx.run_id, node_id = %node_id, "node skipped");
            emit_event(
                &self.callbacks,
                RunEvent::NodeFinished {
                    run_id: self.ctx.run_id.clone(),
                    node_id,
                    status: NodeStatus::Skipped,
                    attempts: 0,
                },
            )
            .await;
        }
    }

    async fn drain(&mut self, join_set: &mut JoinSet<TaskReport>) {
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    let _ = self.apply_report(report, false).await;
                }
                Err(e) => {
                    warn!(run_id = %self.ctx.run_id, error = %e, "node task join error during drain");
                }
            }
        }
    }

    fn budget_breach(&self) -> Option<PlexusError> {
        if let Some(max_cost) = self.budget.max_cost {
            if self.ctx.cost() > max_cost {
                return Some(PlexusError::BudgetExceeded(format!(
                    "cost {:.4} exceeds max {max_cost:.4}",
                    self.ctx.cost()
                )));
            }
        }
        if let Some(max_tokens) = self.budget.max_tokens {
            if self.ctx.tokens_used() > max_tokens {
                return Some(PlexusError::BudgetExceeded(format!(
                    "{} tokens exceed max {max_tokens}",
                    self.ctx.tokens_used()
                )));
            }
        }
        None
    }

    /// One Output node → its result; several → name-keyed map; none →
    /// the last completed trace entry's output.
    fn final_output(&self) -> Value {
        let outputs: Vec<(String, Value)> = self
            .graph
            .output_node_ids()
            .into_iter()
            .filter_map(|id| {
                let result = self.ctx.node_results().get(id)?;
                let name = self
                    .graph
                    .node(id)
                    .map(|node| node.name.clone())
                    .unwrap_or_else(|| id.to_string());
                Some((name, result.output.clone()))
            })
            .collect();

        match outputs.len() {
            0 => self
                .ctx
                .trace()
                .iter()
                .rev()
                .find(|entry| entry.status == NodeStatus::Completed)
                .map(|entry| entry.output.clone())
                .unwrap_or(Value::Null),
            1 => outputs.into_iter().map(|(_, output)| output).next().unwrap_or(Value::Null),
            _ => Value::Object(outputs.into_iter().collect()),
        }
    }

    async fn publish(&self, status: RunStatus, output: Option<Value>, error: Option<String>) {
        let progress = self.ctx.progress(self.graph.nodes.len());
        let _ = self.status_tx.send(RunStatusUpdate {
            status,
            progress,
            output: output.clone(),
            error: error.clone(),
        });
        if let Err(e) = self
            .store
            .update_status(&self.ctx.run_id, status, progress, output, error)
            .await
        {
            warn!(run_id = %self.ctx.run_id, error = %e, "failed to persist run status");
        }
    }

    fn scope(&self) -> ExecScope {
        ExecScope {
            run_id: self.ctx.run_id.clone(),
            graph: Arc::clone(&self.graph),
            variables: self.ctx.snapshot_variables(),
            results: self.ctx.snapshot_results(),
            router: Arc::clone(&self.router),
            queue: Arc::clone(&self.queue),
            broker: Arc::clone(&self.broker),
            callbacks: Arc::clone(&self.callbacks),
            http: self.http.clone(),
            budget: self.budget,
            spent_cost: self.ctx.cost(),
            spent_tokens: self.ctx.tokens_used(),
            cancelled: self.ctx.cancel_flag(),
        }
    }
}

/// Execute one node with its timeout and retry policy. Every attempt
/// appends a trace entry; retries are immediate, with no backoff.
async fn run_node(node: Node, scope: ExecScope) -> TaskReport {
    let retries = node.error_policy.retry_count;
    let input = node_input(&node, &scope);
    let mut entries = Vec::new();
    let mut attempt = 0u32;

    loop {
        let started = Instant::now();
        let timestamp = Utc::now();
        let result = match node.timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), execute(&node, &scope)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(PlexusError::Timeout(format!(
                        "node '{}' exceeded {ms}ms",
                        node.id
                    ))),
                }
            }
            None => execute(&node, &scope).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                entries.extend(outcome.body_trace.iter().cloned());
                entries.push(TraceEntry {
                    node_id: node.id.clone(),
                    attempt,
                    input: input.clone(),
                    output: outcome.output.clone(),
                    status: NodeStatus::Completed,
                    duration_ms,
                    cost: outcome.cost,
                    tokens_used: outcome.tokens_used,
                    timestamp,
                    error: None,
                });
                return TaskReport {
                    node_id: node.id,
                    entries,
                    result: Ok(outcome),
                    attempts: attempt + 1,
                    elapsed_ms: duration_ms,
                };
            }
            Err(e) => {
                entries.push(TraceEntry {
                    node_id: node.id.clone(),
                    attempt,
                    input: input.clone(),
                    output: Value::Null,
                    status: NodeStatus::Failed,
                    duration_ms,
                    cost: 0.0,
                    tokens_used: 0,
                    timestamp,
                    error: Some(e.to_string()),
                });
                let give_up = e.is_fatal()
                    || attempt >= retries
                    || scope.cancelled.load(Ordering::SeqCst);
                if give_up {
                    return TaskReport {
                        node_id: node.id,
                        entries,
                        result: Err(e),
                        attempts: attempt + 1,
                        elapsed_ms: duration_ms,
                    };
                }
                attempt += 1;
            }
        }
    }
}

/// Compact description of what the node was asked to do, recorded in
/// the trace.
fn node_input(node: &Node, scope: &ExecScope) -> Value {
    match &node.kind {
        NodeKind::Input(config) => {
            let mut names: Vec<&String> = config.variables.keys().collect();
            names.sort();
            json!({ "variables": names })
        }
        NodeKind::Task(config) => json!({
            "task_type": config.task_type,
            "content": render_template(&config.template, &scope.variables),
        }),
        NodeKind::Conditional(config) => json!({ "conditions": config.conditions.len() }),
        NodeKind::Loop(config) => json!({
            "body": config.body,
            "max_iterations": config.max_iterations,
        }),
        NodeKind::Merge(config) => {
            json!({ "strategy": serde_json::to_value(config.strategy).unwrap_or(Value::Null) })
        }
        NodeKind::Delay(config) => json!({ "delay_ms": config.delay_ms }),
        NodeKind::Webhook(config) => json!({
            "method": config.method,
            "url": render_template(&config.url, &scope.variables),
        }),
        NodeKind::Approval(config) => json!({
            "message": render_template(&config.message, &scope.variables),
        }),
        NodeKind::Output(config) => {
            json!({ "format": serde_json::to_value(config.format).unwrap_or(Value::Null) })
        }
    }
}
