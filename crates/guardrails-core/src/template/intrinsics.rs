use crate::template::value::PropertyValue;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Upper bound on physical-name passes. A chain that has not settled by
/// then is a reference cycle.
const MAX_PASSES: usize = 32;

/// Properties that carry a resource's physical name, in lookup order.
const NAME_PROPERTIES: &[&str] = &[
    "FunctionName",
    "RoleName",
    "GroupName",
    "PolicyName",
    "ManagedPolicyName",
    "BucketName",
    "TableName",
    "QueueName",
    "TopicName",
];

/// A resource as it appears in the document, before resolution.
#[derive(Debug, Clone)]
pub struct RawResource {
    pub type_name: String,
    pub properties: Value,
}

/// Marker for a string that depends on a physical name not yet computed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending(String);

/// Resolves intrinsic functions against a flat, order-independent resource table.
pub struct Resolver<'a> {
    resources: &'a BTreeMap<String, RawResource>,
    parameters: &'a BTreeMap<String, Option<Value>>,
    names: BTreeMap<String, String>,
    cyclic: BTreeSet<String>,
    cyclic_parameters: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        resources: &'a BTreeMap<String, RawResource>,
        parameters: &'a BTreeMap<String, Option<Value>>,
    ) -> Self {
        let mut resolver = Self {
            resources,
            parameters,
            names: BTreeMap::new(),
            cyclic: BTreeSet::new(),
            cyclic_parameters: unsettled_parameters(resources, parameters),
        };
        resolver.settle_names();
        resolver
    }

    /// Physical name of a resource, if it settled.
    pub fn physical_name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Ids whose names never settled because of a reference cycle.
    pub fn cyclic(&self) -> &BTreeSet<String> {
        &self.cyclic
    }

    /// Parameters whose defaults reference themselves, directly or through
    /// other parameters. References to them stay unresolved.
    pub fn cyclic_parameters(&self) -> &BTreeSet<String> {
        &self.cyclic_parameters
    }

    fn settle_names(&mut self) {
        let mut pending: BTreeSet<String> = self.resources.keys().cloned().collect();

        for pass in 0..MAX_PASSES {
            let mut settled = Vec::new();
            for id in &pending {
                let raw = &self.resources[id];
                match self.name_of(id, raw) {
                    Ok(name) => settled.push((id.clone(), name)),
                    Err(Pending(_)) => {}
                }
            }
            if settled.is_empty() {
                debug!(pass, remaining = pending.len(), "physical names settled");
                break;
            }
            for (id, name) in settled {
                pending.remove(&id);
                self.names.insert(id, name);
            }
            if pending.is_empty() {
                break;
            }
        }

        self.cyclic = pending;
    }

    fn name_of(&self, id: &str, raw: &RawResource) -> Result<String, Pending> {
        for prop in NAME_PROPERTIES {
            if let Some(value) = raw.properties.get(*prop) {
                return self.text(value);
            }
        }
        Ok(id.to_string())
    }

    /// Resolve a raw document value into a [`PropertyValue`].
    pub fn resolve(&self, value: &Value) -> PropertyValue {
        match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::Number(n) => PropertyValue::String(n.to_string()),
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Sequence(items) => {
                PropertyValue::List(items.iter().map(|i| self.resolve(i)).collect())
            }
            Value::Mapping(map) => {
                if let Some((name, arg)) = intrinsic(value) {
                    return self.resolve_intrinsic(&name, arg);
                }
                PropertyValue::Map(
                    map.iter()
                        .map(|(k, v)| (key_text(k), self.resolve(v)))
                        .collect(),
                )
            }
            Value::Tagged(tagged) => {
                let name = tag_to_intrinsic(&tagged.tag.to_string());
                self.resolve_intrinsic(&name, &tagged.value)
            }
        }
    }

    fn resolve_intrinsic(&self, name: &str, arg: &Value) -> PropertyValue {
        match name {
            "Ref" => match arg.as_str() {
                Some(target) => self.resolve_ref(target),
                None => PropertyValue::Unresolved("Ref".to_string()),
            },
            "Fn::GetAtt" => match get_att_parts(arg) {
                Some((target, attribute)) if self.resources.contains_key(&target) => {
                    PropertyValue::Reference {
                        target,
                        attribute: Some(attribute),
                    }
                }
                Some((target, attribute)) => {
                    PropertyValue::Unresolved(format!("{}.{}", target, attribute))
                }
                None => PropertyValue::Unresolved("Fn::GetAtt".to_string()),
            },
            "Fn::Sub" | "Fn::Join" => PropertyValue::String(self.text_or_placeholder(
                &intrinsic_value(name, arg),
            )),
            "Fn::Split" => self.resolve_split(arg),
            "Fn::Select" => self.resolve_select(arg),
            other => PropertyValue::Unresolved(other.to_string()),
        }
    }

    fn resolve_ref(&self, target: &str) -> PropertyValue {
        if self.resources.contains_key(target) {
            return PropertyValue::Reference {
                target: target.to_string(),
                attribute: None,
            };
        }
        match self.parameters.get(target) {
            Some(Some(default)) if !self.cyclic_parameters.contains(target) => {
                self.resolve(default)
            }
            _ => PropertyValue::Unresolved(target.to_string()),
        }
    }

    /// `Fn::Select [index, list]`. An index that is not a number or falls
    /// outside the list leaves the value unresolved.
    fn resolve_select(&self, arg: &Value) -> PropertyValue {
        let unresolved = || PropertyValue::Unresolved("Fn::Select".to_string());
        let Some([index, list]) = arg.as_sequence().map(Vec::as_slice) else {
            return unresolved();
        };
        let Ok(index) = self.text_or_placeholder(index).trim().parse::<usize>() else {
            return unresolved();
        };
        match self.resolve(list) {
            PropertyValue::List(mut items) if index < items.len() => items.swap_remove(index),
            _ => unresolved(),
        }
    }

    fn resolve_split(&self, arg: &Value) -> PropertyValue {
        let Some(parts) = arg.as_sequence() else {
            return PropertyValue::Unresolved("Fn::Split".to_string());
        };
        let (Some(delimiter), Some(source)) = (parts.first().and_then(Value::as_str), parts.get(1))
        else {
            return PropertyValue::Unresolved("Fn::Split".to_string());
        };
        let joined = self.text_or_placeholder(source);
        PropertyValue::List(
            joined
                .split(delimiter)
                .map(|piece| PropertyValue::String(piece.to_string()))
                .collect(),
        )
    }

    fn text_or_placeholder(&self, value: &Value) -> String {
        self.text(value)
            .unwrap_or_else(|Pending(id)| format!("${{{}}}", id))
    }

    /// Render a raw value in a string context (Sub/Join/name properties).
    fn text(&self, value: &Value) -> Result<String, Pending> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => Ok(s.clone()),
            Value::Sequence(items) => Ok(self.text_items(items)?.join(",")),
            Value::Mapping(_) => match intrinsic(value) {
                Some((name, arg)) => self.intrinsic_text(&name, arg),
                None => Ok("{...}".to_string()),
            },
            Value::Tagged(tagged) => {
                let name = tag_to_intrinsic(&tagged.tag.to_string());
                self.intrinsic_text(&name, &tagged.value)
            }
        }
    }

    fn text_items(&self, items: &[Value]) -> Result<Vec<String>, Pending> {
        items.iter().map(|i| self.text(i)).collect()
    }

    fn intrinsic_text(&self, name: &str, arg: &Value) -> Result<String, Pending> {
        match name {
            "Ref" => match arg.as_str() {
                Some(target) => self.ref_text(target),
                None => Ok("${Ref}".to_string()),
            },
            "Fn::GetAtt" => Ok(match get_att_parts(arg) {
                Some((target, attribute)) => format!("${{{}.{}}}", target, attribute),
                None => "${Fn::GetAtt}".to_string(),
            }),
            "Fn::Sub" => self.sub_text(arg),
            "Fn::Join" => self.join_text(arg),
            "Fn::Split" => Ok(self.resolve_split(arg).render()),
            "Fn::Select" => Ok(self.resolve_select(arg).render()),
            other => Ok(format!("${{{}}}", other)),
        }
    }

    fn ref_text(&self, target: &str) -> Result<String, Pending> {
        if self.resources.contains_key(target) {
            if let Some(name) = self.names.get(target) {
                return Ok(name.clone());
            }
            if self.cyclic.contains(target) {
                return Ok(format!("${{{}}}", target));
            }
            return Err(Pending(target.to_string()));
        }
        match self.parameters.get(target) {
            Some(Some(default)) if !self.cyclic_parameters.contains(target) => self.text(default),
            _ => Ok(format!("${{{}}}", target)),
        }
    }

    fn join_text(&self, arg: &Value) -> Result<String, Pending> {
        let Some(parts) = arg.as_sequence() else {
            return Ok("${Fn::Join}".to_string());
        };
        let delimiter = parts.first().and_then(Value::as_str).unwrap_or("");
        let items = match parts.get(1) {
            Some(Value::Sequence(items)) => self.text_items(items)?,
            Some(other) => match self.resolve(other) {
                PropertyValue::List(values) => values.iter().map(|v| v.render()).collect(),
                single => vec![single.render()],
            },
            None => Vec::new(),
        };
        Ok(items.join(delimiter))
    }

    fn sub_text(&self, arg: &Value) -> Result<String, Pending> {
        let (template, vars) = match arg {
            Value::String(s) => (s.as_str(), None),
            Value::Sequence(parts) => match parts.first().and_then(Value::as_str) {
                Some(s) => (s, parts.get(1).and_then(Value::as_mapping)),
                None => return Ok("${Fn::Sub}".to_string()),
            },
            _ => return Ok("${Fn::Sub}".to_string()),
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let var = &after[..end];
            if let Some(literal) = var.strip_prefix('!') {
                out.push_str("${");
                out.push_str(literal);
                out.push('}');
            } else if let Some(value) = vars.and_then(|m| m.get(var)) {
                out.push_str(&self.text(value)?);
            } else if var.contains('.') {
                out.push_str(&format!("${{{}}}", var));
            } else {
                out.push_str(&self.ref_text(var)?);
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Parameters with a default that never bottoms out. A parameter settles once
/// every parameter its default references has settled; what remains is on a
/// cycle or depends on one. Resource ids win lookups, so they are not edges.
fn unsettled_parameters(
    resources: &BTreeMap<String, RawResource>,
    parameters: &BTreeMap<String, Option<Value>>,
) -> BTreeSet<String> {
    let deps: BTreeMap<&str, BTreeSet<String>> = parameters
        .iter()
        .filter_map(|(name, default)| {
            let default = default.as_ref()?;
            let mut refs = BTreeSet::new();
            collect_refs(default, &mut refs);
            refs.retain(|r| !resources.contains_key(r));
            Some((name.as_str(), refs))
        })
        .collect();

    let mut settled: BTreeSet<&str> = BTreeSet::new();
    loop {
        let before = settled.len();
        for (name, refs) in &deps {
            if settled.contains(name) {
                continue;
            }
            let ready = refs
                .iter()
                .all(|r| settled.contains(r.as_str()) || !deps.contains_key(r.as_str()));
            if ready {
                settled.insert(*name);
            }
        }
        if settled.len() == before {
            break;
        }
    }

    let unsettled: BTreeSet<String> = deps
        .keys()
        .filter(|name| !settled.contains(*name))
        .map(|name| name.to_string())
        .collect();
    if !unsettled.is_empty() {
        debug!(parameters = ?unsettled, "parameter defaults reference each other");
    }
    unsettled
}

/// Every id a raw value could `Ref`, including bare `${Var}` names in `Fn::Sub`.
fn collect_refs(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Sequence(items) => items.iter().for_each(|i| collect_refs(i, out)),
        Value::Mapping(map) => match intrinsic(value) {
            Some((name, arg)) => collect_intrinsic_refs(&name, arg, out),
            None => map.values().for_each(|v| collect_refs(v, out)),
        },
        Value::Tagged(tagged) => {
            let name = tag_to_intrinsic(&tagged.tag.to_string());
            collect_intrinsic_refs(&name, &tagged.value, out);
        }
        _ => {}
    }
}

fn collect_intrinsic_refs(name: &str, arg: &Value, out: &mut BTreeSet<String>) {
    match name {
        "Ref" => {
            if let Some(target) = arg.as_str() {
                out.insert(target.to_string());
            }
        }
        "Fn::Sub" => {
            let (template, vars) = match arg {
                Value::String(s) => (s.as_str(), None),
                Value::Sequence(parts) => (
                    parts.first().and_then(Value::as_str).unwrap_or(""),
                    parts.get(1),
                ),
                _ => ("", None),
            };
            let bound = vars.and_then(Value::as_mapping);
            for var in sub_variables(template) {
                if !bound.is_some_and(|m| m.contains_key(var)) {
                    out.insert(var.to_string());
                }
            }
            if let Some(vars) = vars {
                collect_refs(vars, out);
            }
        }
        _ => collect_refs(arg, out),
    }
}

/// Names substituted by a `Fn::Sub` template, minus `${!literal}` escapes
/// and dotted attribute lookups.
fn sub_variables(template: &str) -> Vec<&str> {
    let mut vars = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let var = &after[..end];
        if !var.starts_with('!') && !var.contains('.') {
            vars.push(var);
        }
        rest = &after[end + 1..];
    }
    vars
}

/// Detect the long intrinsic form: a single-key mapping keyed `Ref` or `Fn::*`.
fn intrinsic(value: &Value) -> Option<(String, &Value)> {
    let map = value.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    let (key, arg) = map.iter().next()?;
    let key = key.as_str()?;
    if key == "Ref" || key.starts_with("Fn::") {
        Some((key.to_string(), arg))
    } else {
        None
    }
}

/// `!GetAtt` -> `Fn::GetAtt`, `!Ref` -> `Ref`.
fn tag_to_intrinsic(tag: &str) -> String {
    let name = tag.trim_start_matches('!');
    if name == "Ref" || name.starts_with("Fn::") {
        name.to_string()
    } else {
        format!("Fn::{}", name)
    }
}

/// Rebuild a long-form value so Sub/Join share the text path.
fn intrinsic_value(name: &str, arg: &Value) -> Value {
    let mut map = serde_yaml::Mapping::new();
    map.insert(Value::String(name.to_string()), arg.clone());
    Value::Mapping(map)
}

fn get_att_parts(arg: &Value) -> Option<(String, String)> {
    match arg {
        Value::Sequence(parts) if parts.len() == 2 => {
            let target = parts[0].as_str()?;
            let attribute = parts[1].as_str()?;
            Some((target.to_string(), attribute.to_string()))
        }
        Value::String(s) => {
            let (target, attribute) = s.split_once('.')?;
            Some((target.to_string(), attribute.to_string()))
        }
        _ => None,
    }
}

pub(crate) fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => serde_yaml::to_string(key)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
