use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// A directed, optionally conditional link enabling a target node
/// once its source completes.
///
/// A conditional edge is only traversed when its condition evaluates
/// true against the run's variables at traversal time; a false
/// condition permanently excludes that path unless an unconditional
/// edge also reaches the same target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}
