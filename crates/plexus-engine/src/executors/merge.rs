use std::collections::HashMap;

use serde_json::Value;

use plexus_core::{PlexusError, RouteRequest};
use plexus_graph::{render_value, MergeConfig, MergeStrategy, Node};

use crate::context::NodeResult;

use super::{ExecScope, NodeOutcome};

/// Fan-in over this node's dependency results using the configured
/// strategy.
pub(crate) async fn run(
    node: &Node,
    config: &MergeConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let inputs: Vec<&NodeResult> = node
        .dependencies
        .iter()
        .filter_map(|dep| scope.results.get(dep))
        .collect();

    if inputs.is_empty() {
        return Err(PlexusError::NodeExecution {
            node: node.id.clone(),
            message: "no completed predecessors to merge".to_string(),
        });
    }

    match config.strategy {
        MergeStrategy::Concatenate => {
            let joined = inputs
                .iter()
                .map(|result| render_value(&result.output))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(NodeOutcome::new(Value::String(joined)))
        }
        MergeStrategy::Summarize => {
            let joined = inputs
                .iter()
                .map(|result| render_value(&result.output))
                .collect::<Vec<_>>()
                .join("\n\n");
            let response = scope
                .router
                .route(RouteRequest::new("summarize", joined))
                .await
                .map_err(|e| PlexusError::NodeExecution {
                    node: node.id.clone(),
                    message: format!("summarize router: {e}"),
                })?;
            if !response.success {
                return Err(PlexusError::NodeExecution {
                    node: node.id.clone(),
                    message: "summarize router reported failure".to_string(),
                });
            }
            let mut outcome = NodeOutcome::new(response.output);
            outcome.cost = response.cost;
            outcome.tokens_used = u64::from(response.tokens_used.total_tokens);
            outcome.quality_score = response.quality_score;
            Ok(outcome)
        }
        MergeStrategy::Vote => Ok(NodeOutcome::new(vote(&inputs))),
        MergeStrategy::BestQuality => {
            let best = inputs
                .iter()
                .filter(|result| result.quality_score.is_some())
                .max_by(|a, b| {
                    a.quality_score
                        .partial_cmp(&b.quality_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(&inputs[0]);
            Ok(NodeOutcome::new(best.output.clone()))
        }
    }
}

/// Majority value by exact equality; first-seen wins ties.
fn vote(inputs: &[&NodeResult]) -> Value {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for result in inputs {
        *counts.entry(result.output.to_string()).or_insert(0) += 1;
    }

    let mut winner = &inputs[0].output;
    let mut winner_count = 0usize;
    for result in inputs {
        let count = counts.get(&result.output.to_string()).copied().unwrap_or(0);
        if count > winner_count {
            winner = &result.output;
            winner_count = count;
        }
    }
    winner.clone()
}
