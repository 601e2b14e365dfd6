use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};

use plexus_core::{NodeStatus, PlexusError, TraceEntry};
use plexus_graph::{evaluate_conditions, LoopConfig, Node};

use crate::context::NodeResult;
use crate::MAX_LOOP_ITERATIONS;

use super::{execute, ExecScope, NodeOutcome};

/// Run the loop body nodes sequentially for up to
/// `min(max_iterations, MAX_LOOP_ITERATIONS)` passes.
///
/// Each pass exposes `_iteration`, `_is_first_iteration`, and
/// `_is_last_iteration`, applies body writes to a pass-local variable
/// overlay, and appends one trace entry per body execution. The break
/// condition is checked after each pass. A body failure fails the
/// loop node itself, subject to the loop's error policy.
pub(crate) async fn run(
    node: &Node,
    config: &LoopConfig,
    scope: &ExecScope,
) -> Result<NodeOutcome, PlexusError> {
    let cap = config.max_iterations.min(MAX_LOOP_ITERATIONS);
    let mut child = scope.clone();
    let mut outcome = NodeOutcome::new(Value::Null);
    let mut iterations = 0u32;

    'passes: for pass in 0..cap {
        if scope.cancelled.load(Ordering::SeqCst) {
            break 'passes;
        }

        for (name, value) in [
            ("_iteration", json!(pass)),
            ("_is_first_iteration", json!(pass == 0)),
            ("_is_last_iteration", json!(pass + 1 == cap)),
        ] {
            child.variables.insert(name.to_string(), value.clone());
            outcome.writes.push((name.to_string(), value));
        }

        for body_id in &config.body {
            let Some(body) = child.graph.node(body_id).cloned() else {
                return Err(PlexusError::DanglingReference(format!(
                    "loop '{}' references unknown body node '{body_id}'",
                    node.id
                )));
            };

            let started = Instant::now();
            let timestamp = Utc::now();
            let body_outcome = execute(&body, &child).await.map_err(|e| {
                PlexusError::NodeExecution {
                    node: node.id.clone(),
                    message: format!("body node '{body_id}' failed on pass {pass}: {e}"),
                }
            })?;
            let duration_ms = started.elapsed().as_millis() as u64;

            for (name, value) in &body_outcome.writes {
                child.variables.insert(name.clone(), value.clone());
            }
            outcome.writes.extend(body_outcome.writes);

            let result = NodeResult {
                node_id: body_id.clone(),
                output: body_outcome.output.clone(),
                cost: body_outcome.cost,
                tokens_used: body_outcome.tokens_used,
                quality_score: body_outcome.quality_score,
                elapsed_ms: duration_ms,
            };
            child.results.insert(body_id.clone(), result.clone());

            outcome.body_trace.extend(body_outcome.body_trace);
            outcome.body_results.extend(body_outcome.body_results);
            outcome.body_trace.push(TraceEntry {
                node_id: body_id.clone(),
                attempt: 0,
                input: json!({ "iteration": pass }),
                output: body_outcome.output,
                status: NodeStatus::Completed,
                duration_ms,
                cost: body_outcome.cost,
                tokens_used: body_outcome.tokens_used,
                timestamp,
                error: None,
            });
            outcome.body_results.push(result);

            outcome.cost += body_outcome.cost;
            outcome.tokens_used += body_outcome.tokens_used;
            child.spent_cost += body_outcome.cost;
            child.spent_tokens += body_outcome.tokens_used;

            if let Some(max_cost) = child.budget.max_cost {
                if child.spent_cost > max_cost {
                    return Err(PlexusError::BudgetExceeded(format!(
                        "cost {:.4} exceeds max {max_cost:.4} during loop '{}'",
                        child.spent_cost, node.id
                    )));
                }
            }
            if let Some(max_tokens) = child.budget.max_tokens {
                if child.spent_tokens > max_tokens {
                    return Err(PlexusError::BudgetExceeded(format!(
                        "{} tokens exceed max {max_tokens} during loop '{}'",
                        child.spent_tokens, node.id
                    )));
                }
            }
        }

        iterations = pass + 1;

        if !config.break_condition.is_empty() {
            let (brk, _) = evaluate_conditions(&config.break_condition, &child.variables);
            if brk {
                break 'passes;
            }
        }
    }

    outcome.iterations = iterations;
    outcome.output = json!({ "iterations": iterations });
    Ok(outcome)
}
