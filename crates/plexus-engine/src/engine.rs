use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use plexus_core::{
    ApprovalDecision, ApprovalQueue, ApprovalRequest, CallbackHandler, PlexusError,
    RunDefinition, RunStatus, RunStore, TaskRouter, TraceEntry,
};
use plexus_graph::{validate, Budget, Graph};

use crate::approval::ApprovalBroker;
use crate::context::ExecutionContext;
use crate::controller::{RunController, RunStatusUpdate};
use crate::scheduler::Scheduler;

/// Per-run overrides supplied by the trigger layer.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub budget: Option<Budget>,
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct RunHandle {
    cancel: Arc<AtomicBool>,
    status_rx: watch::Receiver<RunStatusUpdate>,
}

/// Process-wide orchestration facade.
///
/// Holds the arena of active runs and enforces the concurrent-run
/// ceiling before a run is even created. `execute_graph` returns the
/// run id immediately; the run proceeds on its own task and is
/// observed through [`Engine::watch`] or the configured `RunStore`.
pub struct Engine {
    router: Arc<dyn TaskRouter>,
    store: Arc<dyn RunStore>,
    queue: Arc<dyn ApprovalQueue>,
    broker: Arc<ApprovalBroker>,
    callbacks: Arc<Vec<Arc<dyn CallbackHandler>>>,
    http: reqwest::Client,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    max_concurrent_runs: usize,
}

impl Engine {
    pub fn builder(router: Arc<dyn TaskRouter>) -> EngineBuilder {
        EngineBuilder::new(router)
    }

    /// Validate and launch a run. Validation errors surface here
    /// synchronously and never produce a run record; everything after
    /// that is reported through the run's status.
    pub async fn execute_graph(
        &self,
        graph: Arc<Graph>,
        input: HashMap<String, Value>,
        options: RunOptions,
    ) -> Result<String, PlexusError> {
        validate(&graph)?;

        let mut runs = self.runs.lock().await;
        if runs.len() >= self.max_concurrent_runs {
            return Err(PlexusError::CapacityExceeded {
                active: runs.len(),
                max: self.max_concurrent_runs,
            });
        }

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let definition = RunDefinition {
            run_id: run_id.clone(),
            graph_id: graph.id.clone(),
            input: input.clone(),
            created_at: Utc::now(),
        };
        let run_id = match self.store.create_run(&definition).await {
            Ok(id) => id,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "failed to persist run record");
                run_id
            }
        };

        let ctx = ExecutionContext::new(run_id.clone(), &graph, input);
        let scheduler = Scheduler::new(&graph);
        let (status_tx, status_rx) = watch::channel(RunStatusUpdate {
            status: RunStatus::Pending,
            progress: 0.0,
            output: None,
            error: None,
        });
        runs.insert(
            run_id.clone(),
            RunHandle {
                cancel: ctx.cancel_flag(),
                status_rx,
            },
        );
        drop(runs);

        let controller = RunController {
            budget: options.budget.unwrap_or(graph.budget),
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
            graph,
            ctx,
            scheduler,
            router: Arc::clone(&self.router),
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            broker: Arc::clone(&self.broker),
            callbacks: Arc::clone(&self.callbacks),
            http: self.http.clone(),
            status_tx,
        };

        let runs = Arc::clone(&self.runs);
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            controller.run().await;
            runs.lock().await.remove(&spawned_run_id);
        });

        info!(run_id = %run_id, "run accepted");
        Ok(run_id)
    }

    /// Cooperative cancellation: the flag is observed before the next
    /// batch; in-flight nodes finish but nothing further is chained.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.runs.lock().await.get(run_id) {
            Some(handle) => {
                handle.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Watch an active run's status. Terminal runs leave the arena;
    /// their final state lives in the run store.
    pub async fn watch(&self, run_id: &str) -> Option<watch::Receiver<RunStatusUpdate>> {
        self.runs
            .lock()
            .await
            .get(run_id)
            .map(|handle| handle.status_rx.clone())
    }

    /// Push an approval decision to a parked Approval node.
    pub async fn resolve_approval(&self, approval_id: &str, decision: ApprovalDecision) -> bool {
        self.broker.respond(approval_id, decision).await
    }

    pub async fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.broker.pending_requests().await
    }

    pub async fn active_runs(&self) -> usize {
        self.runs.lock().await.len()
    }
}

pub struct EngineBuilder {
    router: Arc<dyn TaskRouter>,
    store: Option<Arc<dyn RunStore>>,
    queue: Option<Arc<dyn ApprovalQueue>>,
    callbacks: Vec<Arc<dyn CallbackHandler>>,
    http: Option<reqwest::Client>,
    max_concurrent_runs: usize,
}

impl EngineBuilder {
    pub fn new(router: Arc<dyn TaskRouter>) -> Self {
        Self {
            router,
            store: None,
            queue: None,
            callbacks: Vec::new(),
            http: None,
            max_concurrent_runs: 32,
        }
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn approval_queue(mut self, queue: Arc<dyn ApprovalQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn callback(mut self, callback: Arc<dyn CallbackHandler>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max.max(1);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            router: self.router,
            store: self.store.unwrap_or_else(|| Arc::new(DiscardRunStore)),
            queue: self.queue.unwrap_or_else(|| Arc::new(AcceptApprovalQueue)),
            broker: Arc::new(ApprovalBroker::new()),
            callbacks: Arc::new(self.callbacks),
            http: self.http.unwrap_or_default(),
            runs: Arc::new(Mutex::new(HashMap::new())),
            max_concurrent_runs: self.max_concurrent_runs,
        }
    }
}

/// Default store: persistence is the collaborator's concern, so with
/// none configured everything is discarded.
struct DiscardRunStore;

#[async_trait]
impl RunStore for DiscardRunStore {
    async fn create_run(&self, definition: &RunDefinition) -> Result<String, PlexusError> {
        Ok(definition.run_id.clone())
    }

    async fn append_trace(&self, _run_id: &str, _entry: &TraceEntry) -> Result<(), PlexusError> {
        Ok(())
    }

    async fn update_status(
        &self,
        _run_id: &str,
        _status: RunStatus,
        _progress: f32,
        _output: Option<Value>,
        _error: Option<String>,
    ) -> Result<(), PlexusError> {
        Ok(())
    }
}

/// Default queue: accepts every request so the broker alone decides
/// resolution.
struct AcceptApprovalQueue;

#[async_trait]
impl ApprovalQueue for AcceptApprovalQueue {
    async fn create_approval_request(
        &self,
        request: &ApprovalRequest,
    ) -> Result<String, PlexusError> {
        Ok(request.id.clone())
    }
}
