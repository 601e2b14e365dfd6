use std::collections::HashMap;

use plexus_core::PlexusError;

use crate::condition::Condition;
use crate::edge::Edge;
use crate::graph::{Budget, Graph, Parallelism, VariableSpec};
use crate::node::Node;
use crate::validate::validate;

/// Builder for constructing a validated [`Graph`].
pub struct GraphBuilder {
    id: String,
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
    duplicates: Vec<String>,
    edges: Vec<Edge>,
    variables: HashMap<String, VariableSpec>,
    parallelism: Parallelism,
    budget: Budget,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            duplicates: Vec::new(),
            edges: Vec::new(),
            variables: HashMap::new(),
            parallelism: Parallelism::default(),
            budget: Budget::default(),
        }
    }

    pub fn add_node(mut self, node: Node) -> Self {
        if self.nodes.contains_key(&node.id) {
            self.duplicates.push(node.id.clone());
            return self;
        }
        self.node_order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Add an unconditional edge from source to target.
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    /// Add an edge traversed only when the condition evaluates true.
    pub fn add_conditional_edge(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: Condition,
    ) -> Self {
        self.edges.push(Edge::new(source, target).when(condition));
        self
    }

    pub fn declare_variable(mut self, name: impl Into<String>, spec: VariableSpec) -> Self {
        self.variables.insert(name.into(), spec);
        self
    }

    pub fn max_concurrent_nodes(mut self, max: usize) -> Self {
        self.parallelism.max_concurrent_nodes = max.max(1);
        self
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Validate and produce the immutable graph. Warnings (e.g. no
    /// Output node) are logged; structural problems fail the build.
    pub fn build(self) -> Result<Graph, PlexusError> {
        if let Some(id) = self.duplicates.first() {
            return Err(PlexusError::Validation(format!(
                "duplicate node id '{id}'"
            )));
        }

        let graph = Graph {
            id: self.id,
            nodes: self.nodes,
            node_order: self.node_order,
            edges: self.edges,
            variables: self.variables,
            parallelism: self.parallelism,
            budget: self.budget,
        };

        let report = validate(&graph)?;
        for warning in &report.warnings {
            tracing::warn!(graph_id = %graph.id, warning = %warning, "graph validation warning");
        }

        Ok(graph)
    }
}
