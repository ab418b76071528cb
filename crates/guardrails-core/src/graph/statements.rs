use super::resource::{Resource, ResourceKind};
use super::ResourceGraph;
use crate::template::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// One permission statement, flattened out of whatever resource declared it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    /// Logical id of the declaring resource.
    pub owner: String,
    /// Location inside the owner, e.g. `Policies[0].PolicyDocument.Statement[1]`.
    pub path: String,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    /// Only presence matters.
    pub conditions: BTreeMap<String, PropertyValue>,
}

impl PolicyStatement {
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Short discriminator used in finding ids.
    pub fn discriminator(&self) -> String {
        self.path
            .replace("].", "-")
            .replace(['[', '.'], "-")
            .replace(']', "")
            .to_ascii_lowercase()
    }
}

/// Every permission statement in the graph, ordered by owner then path.
///
/// Trust policies (`AssumeRolePolicyDocument`) and managed-policy names are skipped.
pub fn policy_statements(graph: &ResourceGraph) -> Vec<PolicyStatement> {
    let mut statements = Vec::new();
    for resource in graph.resources() {
        match resource.kind {
            ResourceKind::Role => {
                for (i, policy) in list_items(resource.property("Policies")).iter().enumerate() {
                    if let Some(doc) = policy.get("PolicyDocument") {
                        let prefix = format!("Policies[{}].PolicyDocument", i);
                        collect_document(resource, doc, &prefix, &mut statements);
                    }
                }
            }
            ResourceKind::Policy => {
                if let Some(doc) = resource.property("PolicyDocument") {
                    collect_document(resource, doc, "PolicyDocument", &mut statements);
                }
            }
            ResourceKind::Function if resource.is_serverless_function() => {
                for (i, policy) in list_items(resource.property("Policies")).iter().enumerate() {
                    // Plain strings are managed policy names or ARNs.
                    if policy.as_map().is_some() {
                        let prefix = format!("Policies[{}]", i);
                        collect_document(resource, policy, &prefix, &mut statements);
                    }
                }
            }
            _ => {}
        }
    }
    statements
}

fn list_items(value: Option<&PropertyValue>) -> Vec<&PropertyValue> {
    value.map(PropertyValue::items).unwrap_or_default()
}

fn collect_document(
    owner: &Resource,
    document: &PropertyValue,
    prefix: &str,
    out: &mut Vec<PolicyStatement>,
) {
    let Some(statement) = document.get("Statement") else {
        return;
    };
    for (i, entry) in statement.items().into_iter().enumerate() {
        let Some(map) = entry.as_map() else {
            continue;
        };
        let effect = match map.get("Effect").and_then(PropertyValue::as_str) {
            Some(e) if e.eq_ignore_ascii_case("deny") => Effect::Deny,
            _ => Effect::Allow,
        };
        out.push(PolicyStatement {
            owner: owner.id.clone(),
            path: format!("{}.Statement[{}]", prefix, i),
            effect,
            actions: string_set(map.get("Action")),
            resources: string_set(map.get("Resource")),
            conditions: map
                .get("Condition")
                .and_then(PropertyValue::as_map)
                .cloned()
                .unwrap_or_default(),
        });
    }
}

fn string_set(value: Option<&PropertyValue>) -> Vec<String> {
    let mut set: Vec<String> = list_items(value)
        .into_iter()
        .map(PropertyValue::render)
        .filter(|s| !s.is_empty())
        .collect();
    set.dedup();
    set
}
