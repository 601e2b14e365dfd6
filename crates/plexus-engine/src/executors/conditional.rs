use serde_json::json;

use plexus_core::PlexusError;
use plexus_graph::{evaluate_conditions, ConditionalConfig, Node};

use super::{ExecScope, NodeOutcome};

/// Evaluate the condition list and publish the boolean result as a
/// variable for outgoing edges to reference.
pub(crate) async fn run(
    node: &Node,
    config: &ConditionalConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let (result, trace) = evaluate_conditions(&config.conditions, &scope.variables);
    let trace = serde_json::to_value(&trace).map_err(|e| PlexusError::NodeExecution {
        node: node.id.clone(),
        message: format!("failed to encode condition trace: {e}"),
    })?;

    let variable = config.result_variable(&node.id);
    Ok(
        NodeOutcome::new(json!({ "result": result, "conditions": trace }))
            .write(variable, json!(result)),
    )
}
