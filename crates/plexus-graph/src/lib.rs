mod builder;
mod condition;
mod edge;
mod graph;
mod node;
mod template;
mod validate;
mod visualization;

pub use builder::GraphBuilder;
pub use condition::{
    edge_condition_passes, evaluate_conditions, Condition, ConditionOperator, ConditionTrace,
    LogicalOperator,
};
pub use edge::Edge;
pub use graph::{Budget, Graph, Parallelism, VariableSpec, VariableType};
pub use node::{
    ApprovalConfig, ConditionalConfig, DelayConfig, ErrorPolicy, InputConfig, LoopConfig,
    MergeConfig, MergeStrategy, Node, NodeKind, OutputConfig, OutputFormat, TaskConfig,
    WebhookConfig,
};
pub use template::{render_template, render_value};
pub use validate::{validate, ValidationReport};
