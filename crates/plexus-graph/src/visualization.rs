use std::io::Write;
use std::path::Path;

use plexus_core::PlexusError;

use crate::graph::Graph;
use crate::node::NodeKind;

impl Graph {
    /// Render the graph as a Mermaid flowchart string.
    ///
    /// - Nodes are rendered as rectangles labeled `id (kind)`
    /// - Dependencies use solid arrows `-->`
    /// - Conditional edges use dashed arrows `-.->` labeled with the
    ///   condition field and operator
    /// - Loop bodies use dotted membership arrows from the loop node
    ///
    /// Output is deterministic: nodes sort by id, edges by
    /// (source, target).
    pub fn draw_mermaid(&self) -> String {
        let mut lines = vec!["graph TD".to_string()];

        let mut node_ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        node_ids.sort();

        for id in &node_ids {
            if let Some(node) = self.nodes.get(*id) {
                lines.push(format!("    {id}[\"{id} ({})\"]", node.kind.label()));
            }
        }

        let mut dep_edges: Vec<(&str, &str)> = self
            .nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(|dep| (dep.as_str(), node.id.as_str()))
            })
            .collect();
        dep_edges.sort();
        for (source, target) in dep_edges {
            lines.push(format!("    {source} --> {target}"));
        }

        let mut cond_edges: Vec<String> = self
            .edges
            .iter()
            .filter_map(|edge| {
                edge.condition.as_ref().map(|condition| {
                    format!(
                        "    {} -.->|{} {:?}| {}",
                        edge.source, condition.field, condition.operator, edge.target
                    )
                })
            })
            .collect();
        cond_edges.sort();
        lines.extend(cond_edges);

        let mut body_edges: Vec<(&str, &str)> = self
            .nodes
            .values()
            .filter_map(|node| match &node.kind {
                NodeKind::Loop(config) => Some(
                    config
                        .body
                        .iter()
                        .map(|body_id| (node.id.as_str(), body_id.as_str())),
                ),
                _ => None,
            })
            .flatten()
            .collect();
        body_edges.sort();
        for (source, target) in body_edges {
            lines.push(format!("    {source} -.- {target}"));
        }

        lines.join("\n")
    }

    /// Write the Mermaid rendering to a file.
    pub fn save_mermaid(&self, path: impl AsRef<Path>) -> Result<(), PlexusError> {
        let rendered = self.draw_mermaid();
        let mut file = std::fs::File::create(path.as_ref())
            .map_err(|e| PlexusError::Validation(format!("failed to create file: {e}")))?;
        file.write_all(rendered.as_bytes())
            .map_err(|e| PlexusError::Validation(format!("failed to write file: {e}")))?;
        Ok(())
    }
}
