use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resolved template property value.
///
/// Numbers are kept in their textual form so that values such as
/// `IpProtocol: -1` and `IpProtocol: "-1"` compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    /// A reference to another resource in the same document.
    Reference {
        target: String,
        attribute: Option<String>,
    },
    /// An intrinsic that could not be resolved statically.
    Unresolved(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Follow a `/`-free path of mapping keys.
    pub fn get_path(&self, path: &[&str]) -> Option<&PropertyValue> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }

    /// A single value or a list, flattened into a slice-like vector.
    pub fn items(&self) -> Vec<&PropertyValue> {
        match self {
            PropertyValue::List(items) => items.iter().collect(),
            PropertyValue::Null => Vec::new(),
            other => vec![other],
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            PropertyValue::Reference { .. } | PropertyValue::Unresolved(_)
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PropertyValue::Null => true,
            PropertyValue::String(s) => s.is_empty(),
            PropertyValue::List(items) => items.is_empty(),
            PropertyValue::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Render as display text. References and unresolved intrinsics render
    /// as `${...}` placeholders.
    pub fn render(&self) -> String {
        match self {
            PropertyValue::Null => String::new(),
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::String(s) => s.clone(),
            PropertyValue::List(items) => items
                .iter()
                .map(|i| i.render())
                .collect::<Vec<_>>()
                .join(","),
            PropertyValue::Map(_) => "{...}".to_string(),
            PropertyValue::Reference { target, attribute } => match attribute {
                Some(attr) => format!("${{{}.{}}}", target, attr),
                None => format!("${{{}}}", target),
            },
            PropertyValue::Unresolved(name) => format!("${{{}}}", name),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}
