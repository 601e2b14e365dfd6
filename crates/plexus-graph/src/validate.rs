use std::collections::{HashMap, VecDeque};

use plexus_core::PlexusError;

use crate::graph::Graph;
use crate::node::NodeKind;

/// Non-fatal findings from validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Structural validation: entry points, dangling references, cycles.
///
/// Validation is pure and idempotent — the same graph always yields
/// the same result.
pub fn validate(graph: &Graph) -> Result<ValidationReport, PlexusError> {
    if !graph.nodes.values().any(|node| node.is_entry()) {
        return Err(PlexusError::NoEntryPoint);
    }

    check_references(graph)?;
    check_cycles(graph)?;

    let mut report = ValidationReport::default();

    if graph.output_node_ids().is_empty() {
        report.warnings.push(
            "no output node: the run will return the last completed node's result".to_string(),
        );
    }

    Ok(report)
}

fn check_references(graph: &Graph) -> Result<(), PlexusError> {
    for node in graph.nodes.values() {
        for dep in &node.dependencies {
            if !graph.nodes.contains_key(dep) {
                return Err(PlexusError::DanglingReference(format!(
                    "node '{}' depends on unknown node '{dep}'",
                    node.id
                )));
            }
        }
        if let Some(fallback) = &node.error_policy.fallback_node {
            if !graph.nodes.contains_key(fallback) {
                return Err(PlexusError::DanglingReference(format!(
                    "node '{}' falls back to unknown node '{fallback}'",
                    node.id
                )));
            }
        }
        if let NodeKind::Loop(config) = &node.kind {
            for body_id in &config.body {
                if !graph.nodes.contains_key(body_id) {
                    return Err(PlexusError::DanglingReference(format!(
                        "loop '{}' references unknown body node '{body_id}'",
                        node.id
                    )));
                }
                if body_id == &node.id {
                    return Err(PlexusError::Validation(format!(
                        "loop '{}' cannot contain itself",
                        node.id
                    )));
                }
            }
        }
    }

    for edge in &graph.edges {
        if !graph.nodes.contains_key(&edge.source) {
            return Err(PlexusError::DanglingReference(format!(
                "edge source '{}' not found",
                edge.source
            )));
        }
        if !graph.nodes.contains_key(&edge.target) {
            return Err(PlexusError::DanglingReference(format!(
                "edge target '{}' not found",
                edge.target
            )));
        }
    }

    Ok(())
}

/// Kahn's in-degree reduction over the dependency relation. If the
/// graph does not fully reduce, the unreduced node set is the cycle
/// (or feeds one) and is reported by name.
fn check_cycles(graph: &Graph) -> Result<(), PlexusError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in graph.nodes.values() {
        in_degree.entry(node.id.as_str()).or_insert(0);
        for dep in &node.dependencies {
            *in_degree.entry(node.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = graph
        .node_order
        .iter()
        .map(String::as_str)
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();
    let mut reduced = 0usize;

    while let Some(id) = queue.pop_front() {
        reduced += 1;
        for dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .filter(|d| **d > 0)
                .map(|d| {
                    *d -= 1;
                    *d
                });
            if degree == Some(0) {
                queue.push_back(*dependent);
            }
        }
    }

    if reduced < graph.nodes.len() {
        let mut nodes: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        nodes.sort();
        return Err(PlexusError::DependencyCycle { nodes });
    }

    Ok(())
}
