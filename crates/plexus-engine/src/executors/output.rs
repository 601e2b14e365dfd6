use chrono::Utc;
use serde_json::{json, Value};

use plexus_core::PlexusError;
use plexus_graph::{render_value, Node, OutputConfig, OutputFormat};

use super::{ExecScope, NodeOutcome};

/// Format the accumulated result as the run's final output.
///
/// Reads the configured source variable, or falls back to the latest
/// dependency that completed.
pub(crate) async fn run(
    node: &Node,
    config: &OutputConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let base = match &config.source {
        Some(variable) => scope.variables.get(variable).cloned().unwrap_or(Value::Null),
        None => node
            .dependencies
            .iter()
            .rev()
            .find_map(|dep| scope.results.get(dep))
            .map(|result| result.output.clone())
            .unwrap_or(Value::Null),
    };

    let output = match config.format {
        OutputFormat::Text => Value::String(render_value(&base)),
        OutputFormat::Json => base,
        OutputFormat::Structured => json!({
            "output": base,
            "run_id": scope.run_id,
            "cost": scope.spent_cost,
            "tokens_used": scope.spent_tokens,
            "generated_at": Utc::now().to_rfc3339(),
        }),
    };

    Ok(NodeOutcome::new(output))
}
