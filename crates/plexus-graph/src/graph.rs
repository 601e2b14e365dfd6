use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edge::Edge;
use crate::node::{Node, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl VariableType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Array => value.is_array(),
            VariableType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl VariableSpec {
    pub fn new(var_type: VariableType) -> Self {
        Self {
            var_type,
            default: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelism {
    pub max_concurrent_nodes: usize,
}

impl Default for Parallelism {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 4,
        }
    }
}

/// Cost/token ceiling that aborts a run unconditionally once
/// exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// An immutable workflow description: nodes, edges, declared
/// variables, parallelism, and budget.
///
/// Built once via [`crate::GraphBuilder`], then shared across runs
/// (typically as `Arc<Graph>`). The engine re-validates on
/// `execute_graph`, so a hand-assembled graph cannot sneak past the
/// structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub nodes: HashMap<String, Node>,
    /// Node ids in insertion order; scheduling uses this for
    /// deterministic FIFO seeding.
    pub node_order: Vec<String>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: HashMap<String, VariableSpec>,
    #[serde(default)]
    pub parallelism: Parallelism,
    #[serde(default)]
    pub budget: Budget,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes with no dependencies, in insertion order.
    pub fn entry_nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| node.is_entry())
    }

    /// Ids claimed as loop bodies; these are executed by their owning
    /// loop node, never scheduled directly.
    pub fn loop_body_ids(&self) -> std::collections::HashSet<&str> {
        self.nodes
            .values()
            .filter_map(|node| match &node.kind {
                NodeKind::Loop(config) => Some(config.body.iter().map(String::as_str)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn output_node_ids(&self) -> Vec<&str> {
        self.node_order
            .iter()
            .filter(|id| {
                matches!(
                    self.nodes.get(*id).map(|n| &n.kind),
                    Some(NodeKind::Output(_))
                )
            })
            .map(String::as_str)
            .collect()
    }

    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |edge| edge.source == source)
    }

    pub fn edges_to<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |edge| edge.target == target)
    }
}
