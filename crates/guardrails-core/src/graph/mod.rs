pub mod builder;
pub mod resource;
pub mod statements;

use crate::error::{Result, ScanError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use resource::{Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Edge labels in the resource graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relation {
    /// Function or policy -> IAM role.
    AttachedRole,
    /// Function -> security group.
    MemberOfSg,
    /// Subnet or VPC endpoint -> route table.
    RoutedBy,
    /// Function -> subnet.
    AssociatedSubnet,
    /// Route table -> gateway or endpoint.
    TargetsGateway,
}

impl Relation {
    pub fn label(&self) -> &str {
        match self {
            Relation::AttachedRole => "attached-role",
            Relation::MemberOfSg => "member-of-sg",
            Relation::RoutedBy => "routed-by",
            Relation::AssociatedSubnet => "associated-subnet",
            Relation::TargetsGateway => "targets-gateway",
        }
    }
}

/// The resolved, reference-free model of one infrastructure document.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    pub source_file: String,
    pub graph: DiGraph<Resource, Relation>,
    pub node_map: HashMap<String, NodeIndex>,
}

impl ResourceGraph {
    pub fn new(source_file: String) -> Self {
        Self {
            source_file,
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Add a resource node, returning its index. Re-adding an id returns the existing node.
    pub fn add_resource(&mut self, resource: Resource) -> NodeIndex {
        if let Some(idx) = self.node_map.get(&resource.id) {
            return *idx;
        }
        let id = resource.id.clone();
        let idx = self.graph.add_node(resource);
        self.node_map.insert(id, idx);
        idx
    }

    /// Add a labelled edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, from_id: &str, to_id: &str, relation: Relation) -> Result<()> {
        let from_idx = *self.node_map.get(from_id).ok_or_else(|| {
            ScanError::template(
                &self.source_file,
                format!("edge {} from unknown resource '{}'", relation.label(), from_id),
            )
        })?;
        let to_idx = *self.node_map.get(to_id).ok_or_else(|| {
            ScanError::template(
                &self.source_file,
                format!(
                    "edge {} from '{}' to unknown resource '{}'",
                    relation.label(),
                    from_id,
                    to_id
                ),
            )
        })?;
        if !self.has_edge(from_idx, to_idx, relation) {
            self.graph.add_edge(from_idx, to_idx, relation);
        }
        Ok(())
    }

    fn has_edge(&self, from: NodeIndex, to: NodeIndex, relation: Relation) -> bool {
        self.graph
            .edges_connecting(from, to)
            .any(|e| *e.weight() == relation)
    }

    /// Get a resource by its logical id.
    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.node_map.get(id).map(|idx| &self.graph[*idx])
    }

    /// All resources, ordered by id.
    pub fn resources(&self) -> Vec<&Resource> {
        let mut all: Vec<&Resource> = self.graph.node_weights().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Resources of one kind, ordered by id.
    pub fn resources_of_kind(&self, kind: ResourceKind) -> Vec<&Resource> {
        self.resources()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    /// Targets of outgoing edges with the given label, ordered by id.
    pub fn targets(&self, id: &str, relation: Relation) -> Vec<&Resource> {
        self.adjacent(id, relation, Direction::Outgoing)
    }

    /// Sources of incoming edges with the given label, ordered by id.
    pub fn sources(&self, id: &str, relation: Relation) -> Vec<&Resource> {
        self.adjacent(id, relation, Direction::Incoming)
    }

    fn adjacent(&self, id: &str, relation: Relation, direction: Direction) -> Vec<&Resource> {
        let Some(idx) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<&Resource> = self
            .graph
            .edges_directed(*idx, direction)
            .filter(|e| *e.weight() == relation)
            .map(|e| match direction {
                Direction::Outgoing => &self.graph[e.target()],
                Direction::Incoming => &self.graph[e.source()],
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        found
    }

    pub fn resource_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edges as `(from, relation, to)` triples, sorted.
    pub fn edge_list(&self) -> Vec<(String, Relation, String)> {
        let mut edges: Vec<(String, Relation, String)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].id.clone(),
                    *e.weight(),
                    self.graph[e.target()].id.clone(),
                )
            })
            .collect();
        edges.sort_by(|a, b| (&a.0, a.1.label(), &a.2).cmp(&(&b.0, b.1.label(), &b.2)));
        edges
    }
}

/// Generate a Mermaid flowchart of the resource graph.
pub fn to_mermaid(graph: &ResourceGraph) -> String {
    let mut lines = Vec::new();
    lines.push("graph LR".to_string());

    for resource in graph.resources() {
        lines.push(format!(
            "    {}[\"{}\\n{}\"]",
            node_name(&resource.id),
            resource.id,
            resource.kind.label()
        ));
    }

    for (from, relation, to) in graph.edge_list() {
        lines.push(format!(
            "    {} -->|{}| {}",
            node_name(&from),
            relation.label(),
            node_name(&to)
        ));
    }

    let external: Vec<String> = graph
        .resources_of_kind(ResourceKind::External)
        .iter()
        .map(|r| node_name(&r.id))
        .collect();
    if !external.is_empty() {
        lines.push(format!(
            "    style {} fill:#9ca3af,color:#fff",
            external.join(",")
        ));
    }

    lines.join("\n")
}

/// Generate a DOT (Graphviz) representation of the resource graph.
pub fn to_dot(graph: &ResourceGraph) -> String {
    let mut lines = Vec::new();
    lines.push(format!("digraph \"{}\" {{", graph.source_file));
    lines.push("    rankdir=LR;".to_string());
    lines.push(
        "    node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\"];".to_string(),
    );
    lines.push("    edge [color=\"#666666\"];".to_string());
    lines.push(String::new());

    for resource in graph.resources() {
        let color = match resource.kind {
            ResourceKind::Function => "#3b82f6",
            ResourceKind::Role | ResourceKind::Policy => "#f59e0b",
            ResourceKind::SecurityGroup => "#ef4444",
            ResourceKind::External => "#9ca3af",
            _ => "#22c55e",
        };
        lines.push(format!(
            "    \"{}\" [label=\"{}\\n{}\", fillcolor=\"{}\", fontcolor=\"#ffffff\"];",
            resource.id,
            resource.id,
            resource.kind.label(),
            color
        ));
    }

    lines.push(String::new());

    for (from, relation, to) in graph.edge_list() {
        lines.push(format!(
            "    \"{}\" -> \"{}\" [label=\"{}\"];",
            from,
            to,
            relation.label()
        ));
    }

    lines.push("}".to_string());
    lines.join("\n")
}

/// Mermaid node ids cannot contain dashes or colons.
fn node_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn small_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new("template.yaml".into());
        graph.add_resource(Resource::new("Fn", "AWS::Lambda::Function", BTreeMap::new()));
        graph.add_resource(Resource::new("Role", "AWS::IAM::Role", BTreeMap::new()));
        graph.add_resource(Resource::external("sg-123"));
        graph.add_edge("Fn", "Role", Relation::AttachedRole).unwrap();
        graph.add_edge("Fn", "sg-123", Relation::MemberOfSg).unwrap();
        graph
    }

    #[test]
    fn test_edge_to_unknown_resource_is_rejected() {
        let mut graph = small_graph();
        let err = graph
            .add_edge("Fn", "Missing", Relation::AssociatedSubnet)
            .unwrap_err();
        assert!(matches!(err, ScanError::TemplateParse { .. }));
    }

    #[test]
    fn test_targets_and_sources() {
        let graph = small_graph();
        let roles = graph.targets("Fn", Relation::AttachedRole);
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].id, "Role");
        let attached = graph.sources("Role", Relation::AttachedRole);
        assert_eq!(attached[0].id, "Fn");
        assert!(graph.targets("Fn", Relation::RoutedBy).is_empty());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = small_graph();
        graph.add_edge("Fn", "Role", Relation::AttachedRole).unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_mermaid_output() {
        let mermaid = to_mermaid(&small_graph());
        assert!(mermaid.contains("graph LR"));
        assert!(mermaid.contains("Fn -->|attached-role| Role"));
        assert!(mermaid.contains("sg_123"));
    }

    #[test]
    fn test_dot_output() {
        let dot = to_dot(&small_graph());
        assert!(dot.contains("digraph"));
        assert!(dot.contains("\"Fn\" -> \"sg-123\" [label=\"member-of-sg\"]"));
    }
}
