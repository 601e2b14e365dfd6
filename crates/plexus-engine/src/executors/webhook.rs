use serde_json::Value;

use plexus_core::PlexusError;
use plexus_graph::{render_template, Node, WebhookConfig};

use super::{ExecScope, NodeOutcome};

/// Outbound HTTP call. Non-2xx responses and transport errors are
/// treated identically as node execution failures.
pub(crate) async fn run(
    node: &Node,
    config: &WebhookConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let url = render_template(&config.url, &scope.variables);
    let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|_| PlexusError::NodeExecution {
            node: node.id.clone(),
            message: format!("invalid http method '{}'", config.method),
        })?;

    let mut request = scope.http.request(method, &url);
    for (name, value) in &config.headers {
        request = request.header(name.as_str(), render_template(value, &scope.variables));
    }
    if let Some(body) = &config.body {
        request = request.body(render_template(body, &scope.variables));
    }

    let response = request.send().await.map_err(|e| PlexusError::NodeExecution {
        node: node.id.clone(),
        message: format!("webhook request failed: {e}"),
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| PlexusError::NodeExecution {
        node: node.id.clone(),
        message: format!("webhook response read failed: {e}"),
    })?;

    if !status.is_success() {
        return Err(PlexusError::NodeExecution {
            node: node.id.clone(),
            message: format!("webhook returned {status}"),
        });
    }

    let output = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    Ok(NodeOutcome::new(output))
}
