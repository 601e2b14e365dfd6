use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single predicate over the run's variables.
///
/// `logical_operator` joins this condition with the accumulated
/// result of the ones before it; the first condition's operator is
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            logical_operator: LogicalOperator::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = LogicalOperator::Or;
        self
    }
}

/// Per-condition record kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTrace {
    pub field: String,
    pub operator: ConditionOperator,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
}

/// Evaluate an ordered condition list against the variable map.
///
/// Conditions combine left to right: AND by default, OR where marked.
/// Returns the boolean outcome and one trace entry per condition.
pub fn evaluate_conditions(
    conditions: &[Condition],
    variables: &HashMap<String, Value>,
) -> (bool, Vec<ConditionTrace>) {
    let mut trace = Vec::with_capacity(conditions.len());
    let mut result: Option<bool> = None;

    for condition in conditions {
        let actual = variables.get(&condition.field).cloned().unwrap_or(Value::Null);
        let passed = evaluate_one(condition, &actual);
        trace.push(ConditionTrace {
            field: condition.field.clone(),
            operator: condition.operator,
            expected: condition.value.clone(),
            actual,
            passed,
        });

        result = Some(match (result, condition.logical_operator) {
            (None, _) => passed,
            (Some(acc), LogicalOperator::And) => acc && passed,
            (Some(acc), LogicalOperator::Or) => acc || passed,
        });
    }

    (result.unwrap_or(true), trace)
}

/// Evaluate a single optional condition, as used on edges. `None`
/// always passes.
pub fn edge_condition_passes(
    condition: Option<&Condition>,
    variables: &HashMap<String, Value>,
) -> bool {
    match condition {
        Some(condition) => {
            let actual = variables.get(&condition.field).cloned().unwrap_or(Value::Null);
            evaluate_one(condition, &actual)
        }
        None => true,
    }
}

fn evaluate_one(condition: &Condition, actual: &Value) -> bool {
    match condition.operator {
        ConditionOperator::Equals => values_equal(actual, &condition.value),
        ConditionOperator::NotEquals => !values_equal(actual, &condition.value),
        ConditionOperator::Contains => contains(actual, &condition.value),
        ConditionOperator::GreaterThan => {
            compare(actual, &condition.value).is_some_and(|ord| ord == std::cmp::Ordering::Greater)
        }
        ConditionOperator::LessThan => {
            compare(actual, &condition.value).is_some_and(|ord| ord == std::cmp::Ordering::Less)
        }
        ConditionOperator::Exists => !actual.is_null(),
        ConditionOperator::Matches => matches_regex(actual, &condition.value),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    // Numbers compare by value so 15 == 15.0.
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a == b;
    }
    actual == expected
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(haystack) => expected
            .as_str()
            .map(|needle| haystack.contains(needle))
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn matches_regex(actual: &Value, pattern: &Value) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    let subject = match actual {
        Value::String(s) => s.clone(),
        Value::Null => return false,
        other => other.to_string(),
    };
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(&subject),
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "invalid condition regex");
            false
        }
    }
}
