use plexus_core::{PlexusError, RouteRequest};
use plexus_graph::{render_template, Node, TaskConfig};

use super::{ExecScope, NodeOutcome};

/// Interpolate the template and dispatch it to the Task Router.
pub(crate) async fn run(
    node: &Node,
    config: &TaskConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let content = render_template(&config.template, &scope.variables);

    let mut request = RouteRequest::new(&config.task_type, content);
    request.max_cost = config.max_cost;
    request.max_latency_ms = config.max_latency_ms;
    request.metadata = config.metadata.clone();

    let response = scope.router.route(request).await.map_err(|e| {
        PlexusError::NodeExecution {
            node: node.id.clone(),
            message: format!("task router: {e}"),
        }
    })?;

    if !response.success {
        return Err(PlexusError::NodeExecution {
            node: node.id.clone(),
            message: "task router reported failure".to_string(),
        });
    }

    let mut outcome = NodeOutcome::new(response.output.clone());
    outcome.cost = response.cost;
    outcome.tokens_used = u64::from(response.tokens_used.total_tokens);
    outcome.quality_score = response.quality_score;
    if let Some(variable) = &config.output_variable {
        outcome.writes.push((variable.clone(), response.output));
    }
    Ok(outcome)
}
