use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlexusError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("dependency cycle among nodes: {}", .nodes.join(", "))]
    DependencyCycle { nodes: Vec<String> },
    #[error("dangling reference: {0}")]
    DanglingReference(String),
    #[error("no entry point: every node declares dependencies")]
    NoEntryPoint,
    #[error("missing required variable: {0}")]
    MissingRequiredVariable(String),
    #[error("node '{node}' failed: {message}")]
    NodeExecution { node: String, message: String },
    #[error("approval timed out for node '{0}'")]
    ApprovalTimeout(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("capacity exceeded: {active} active runs (max {max})")]
    CapacityExceeded { active: usize, max: usize },
    #[error("run cancelled")]
    Cancelled,
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("router error: {0}")]
    Router(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("callback error: {0}")]
    Callback(String),
}

impl PlexusError {
    /// Graph-shape errors that are surfaced synchronously and never
    /// produce a run record.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PlexusError::Validation(_)
                | PlexusError::DependencyCycle { .. }
                | PlexusError::DanglingReference(_)
                | PlexusError::NoEntryPoint
        )
    }

    /// Errors that abort a run regardless of any `continue_on_error`
    /// setting on the failing node.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlexusError::BudgetExceeded(_) | PlexusError::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// A unit of work dispatched to the external Task Router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub task_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl RouteRequest {
    pub fn new(task_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            content: content.into(),
            max_cost: None,
            max_latency_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub output: Value,
    pub cost: f64,
    pub tokens_used: TokenUsage,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// Executes the atomic unit of work inside a Task node.
///
/// The router must be idempotent-safe for retry: the engine re-runs
/// failed requests per the node's error policy and does not
/// deduplicate them.
#[async_trait]
pub trait TaskRouter: Send + Sync {
    async fn route(&self, request: RouteRequest) -> Result<RouteResponse, PlexusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Completed,
    Failed,
    Skipped,
}

/// One entry per node execution attempt, including retries and loop
/// body passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: String,
    pub attempt: u32,
    pub input: Value,
    pub output: Value,
    pub status: NodeStatus,
    pub duration_ms: u64,
    pub cost: f64,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDefinition {
    pub run_id: String,
    pub graph_id: String,
    pub input: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator for runs, traces, and status.
///
/// The engine calls this after every node completion and at terminal
/// transitions. Persistence is best-effort: failures are logged by
/// the caller and never abort the run.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, definition: &RunDefinition) -> Result<String, PlexusError>;

    async fn append_trace(&self, run_id: &str, entry: &TraceEntry) -> Result<(), PlexusError>;

    async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: f32,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), PlexusError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Denied {
        reason: String,
    },
}

/// External task-queue collaborator for human approvals.
///
/// The engine registers the request here and parks until a decision
/// is pushed back in through `Engine::resolve_approval`.
#[async_trait]
pub trait ApprovalQueue: Send + Sync {
    async fn create_approval_request(
        &self,
        request: &ApprovalRequest,
    ) -> Result<String, PlexusError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        graph_id: String,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
    },
    NodeFinished {
        run_id: String,
        node_id: String,
        status: NodeStatus,
        attempts: u32,
    },
    ApprovalRequested {
        run_id: String,
        node_id: String,
        approval_id: String,
    },
    RunFinished {
        run_id: String,
        output: Value,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
    RunCancelled {
        run_id: String,
    },
}

#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn on_event(&self, event: RunEvent) -> Result<(), PlexusError>;
}
