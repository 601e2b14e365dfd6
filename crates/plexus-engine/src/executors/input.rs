use serde_json::{json, Value};

use plexus_core::PlexusError;
use plexus_graph::{InputConfig, Node, VariableSpec};

use super::{ExecScope, NodeOutcome};

/// Validate declared variables (graph-level and node-level) against
/// the run's variables, writing defaults for absent optional ones.
pub(crate) async fn run(
    node: &Node,
    config: &InputConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let mut specs: Vec<(&String, &VariableSpec)> = scope
        .graph
        .variables
        .iter()
        .chain(config.variables.iter())
        .collect();
    specs.sort_by(|a, b| a.0.cmp(b.0));

    let mut outcome = NodeOutcome::new(Value::Null);
    let mut defaulted = Vec::new();

    for (name, spec) in specs {
        match scope.variables.get(name.as_str()) {
            None | Some(Value::Null) => {
                if let Some(default) = &spec.default {
                    outcome.writes.push((name.clone(), default.clone()));
                    defaulted.push(name.clone());
                } else if spec.required {
                    return Err(PlexusError::MissingRequiredVariable(name.clone()));
                }
            }
            Some(value) => {
                if !spec.var_type.accepts(value) {
                    return Err(PlexusError::Validation(format!(
                        "variable '{name}' has the wrong type for node '{}'",
                        node.id
                    )));
                }
            }
        }
    }

    outcome.output = json!({ "defaulted": defaulted });
    Ok(outcome)
}
