use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::graph::VariableSpec;

/// Recovery behavior applied when a node's executor fails.
///
/// Retries are immediate re-runs with no backoff. After retries are
/// exhausted, `fallback_node` (if set) is scheduled and the run
/// continues; otherwise `continue_on_error` decides whether the run
/// keeps going or aborts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_node: Option<String>,
}

/// A single typed step in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Node {
    /// Create a node; `name` defaults to the id.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            dependencies: Vec::new(),
            error_policy: ErrorPolicy::default(),
            timeout_ms: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.error_policy.retry_count = retry_count;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.error_policy.continue_on_error = true;
        self
    }

    pub fn with_fallback(mut self, node_id: impl Into<String>) -> Self {
        self.error_policy.fallback_node = Some(node_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn is_entry(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Closed set of node kinds. Execution dispatches through a single
/// exhaustive match, so adding a kind is compile-time checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Input(InputConfig),
    Task(TaskConfig),
    Conditional(ConditionalConfig),
    Loop(LoopConfig),
    Merge(MergeConfig),
    Delay(DelayConfig),
    Webhook(WebhookConfig),
    Approval(ApprovalConfig),
    Output(OutputConfig),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Input(_) => "input",
            NodeKind::Task(_) => "task",
            NodeKind::Conditional(_) => "conditional",
            NodeKind::Loop(_) => "loop",
            NodeKind::Merge(_) => "merge",
            NodeKind::Delay(_) => "delay",
            NodeKind::Webhook(_) => "webhook",
            NodeKind::Approval(_) => "approval",
            NodeKind::Output(_) => "output",
        }
    }
}

/// Validates declared variables and writes defaults into the run's
/// variable map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub variables: HashMap<String, VariableSpec>,
}

impl InputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, name: impl Into<String>, spec: VariableSpec) -> Self {
        self.variables.insert(name.into(), spec);
        self
    }
}

/// Interpolates a `{{variable}}` template and dispatches the result
/// to the Task Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_type: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl TaskConfig {
    pub fn new(task_type: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            template: template.into(),
            output_variable: None,
            max_cost: None,
            max_latency_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn output_to(mut self, variable: impl Into<String>) -> Self {
        self.output_variable = Some(variable.into());
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }
}

/// Evaluates an ordered condition list and records the boolean result
/// in a variable. Branching itself happens on outgoing edges that
/// reference that variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl ConditionalConfig {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            output_variable: None,
        }
    }

    pub fn output_to(mut self, variable: impl Into<String>) -> Self {
        self.output_variable = Some(variable.into());
        self
    }

    /// The variable the boolean result is written to.
    pub fn result_variable(&self, node_id: &str) -> String {
        self.output_variable
            .clone()
            .unwrap_or_else(|| format!("{node_id}_result"))
    }
}

/// Re-runs its body nodes sequentially up to `max_iterations` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Node ids executed in order on each pass. Body nodes are owned
    /// by the loop and never scheduled independently.
    pub body: Vec<String>,
    pub max_iterations: u32,
    /// Checked after each pass; an empty list never breaks early.
    #[serde(default)]
    pub break_condition: Vec<Condition>,
}

impl LoopConfig {
    pub fn new<I, S>(body: I, max_iterations: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            body: body.into_iter().map(Into::into).collect(),
            max_iterations,
            break_condition: Vec::new(),
        }
    }

    pub fn break_when(mut self, conditions: Vec<Condition>) -> Self {
        self.break_condition = conditions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Concatenate,
    Summarize,
    Vote,
    BestQuality,
}

/// Fan-in over the results of this node's dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    pub strategy: MergeStrategy,
}

impl MergeConfig {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self { strategy }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    pub delay_ms: u64,
}

impl DelayConfig {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

/// Outbound HTTP call. Url, header values, and body are all
/// `{{variable}}`-interpolated at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, template: impl Into<String>) -> Self {
        self.body = Some(template.into());
        self
    }
}

/// Parks the run on a human decision pushed in from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub message: String,
    #[serde(default)]
    pub payload: Value,
    /// Approval-specific timeout; the node-level timeout still
    /// applies on top when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ApprovalConfig {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: Value::Null,
            timeout_ms: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Structured,
}

/// Formats the run's final output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Variable to read the result from; defaults to the last
    /// dependency's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl OutputConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            source: None,
        }
    }

    pub fn from_variable(mut self, variable: impl Into<String>) -> Self {
        self.source = Some(variable.into());
        self
    }
}
