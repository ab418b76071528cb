pub mod intrinsics;
pub mod value;

use crate::error::{Result, ScanError};
use crate::graph::builder::{self, ResolvedResource};
use crate::graph::ResourceGraph;
use intrinsics::{key_text, RawResource, Resolver};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use value::PropertyValue;

/// Parse an infrastructure template file into a resource graph.
pub fn load_template(path: &Path) -> Result<ResourceGraph> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScanError::template(path, format!("cannot read file: {}", e)))?;
    parse_template(&content, path.to_string_lossy().to_string())
}

/// Parse template content (YAML or JSON) into a resource graph.
///
/// Both long-form intrinsics (`{"Ref": ...}`) and YAML short tags (`!Ref`)
/// are resolved. References to ids absent from the document become
/// [`PropertyValue::Unresolved`] rather than errors.
pub fn parse_template(content: &str, source_file: String) -> Result<ResourceGraph> {
    let doc: Value = serde_yaml::from_str(content)
        .map_err(|e| ScanError::template(&source_file, e.to_string()))?;

    let root = match &doc {
        Value::Mapping(_) => &doc,
        Value::Null => return builder::build(&source_file, Vec::new()),
        _ => {
            return Err(ScanError::template(
                &source_file,
                "template root is not a mapping",
            ))
        }
    };

    let parameters = collect_parameters(root);
    let globals = root.get("Globals").and_then(|g| g.get("Function"));
    let raw = collect_resources(root, globals, &source_file)?;

    let resolver = Resolver::new(&raw, &parameters);
    if !resolver.cyclic().is_empty() {
        warn!(
            ids = ?resolver.cyclic(),
            "reference cycle in physical names; leaving them unresolved"
        );
    }

    let resolved = raw
        .iter()
        .map(|(id, r)| ResolvedResource {
            id: id.clone(),
            type_name: r.type_name.clone(),
            properties: match resolver.resolve(&r.properties) {
                PropertyValue::Map(map) => map,
                _ => BTreeMap::new(),
            },
        })
        .collect();

    debug!(source = %source_file, resources = raw.len(), "template resolved");
    builder::build(&source_file, resolved)
}

fn collect_parameters(root: &Value) -> BTreeMap<String, Option<Value>> {
    root.get("Parameters")
        .and_then(Value::as_mapping)
        .map(|params| {
            params
                .iter()
                .map(|(name, spec)| (key_text(name), spec.get("Default").cloned()))
                .collect()
        })
        .unwrap_or_default()
}

fn collect_resources(
    root: &Value,
    globals: Option<&Value>,
    source_file: &str,
) -> Result<BTreeMap<String, RawResource>> {
    let resources = match root.get("Resources") {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(ScanError::template(
                source_file,
                "'Resources' is not a mapping",
            ))
        }
    };

    let mut raw = BTreeMap::new();
    for (key, body) in resources {
        let id = key_text(key);
        let type_name = body
            .get("Type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ScanError::template(source_file, format!("resource '{}' has no Type", id))
            })?
            .to_string();

        let mut properties = body.get("Properties").cloned().unwrap_or(Value::Null);
        if !matches!(properties, Value::Mapping(_) | Value::Null) {
            return Err(ScanError::template(
                source_file,
                format!("resource '{}' has non-mapping Properties", id),
            ));
        }

        if type_name == "AWS::Serverless::Function" {
            if let Some(globals) = globals {
                merge_globals(&mut properties, globals);
            }
        }

        raw.insert(
            id,
            RawResource {
                type_name,
                properties,
            },
        );
    }
    Ok(raw)
}

/// Merge `Globals.Function` under a function's properties. The function's own values win.
fn merge_globals(properties: &mut Value, globals: &Value) {
    let Some(global_map) = globals.as_mapping() else {
        return;
    };
    if properties.is_null() {
        *properties = globals.clone();
        return;
    }
    let Some(own) = properties.as_mapping_mut() else {
        return;
    };
    for (key, global_value) in global_map {
        match own.get_mut(key) {
            None => {
                own.insert(key.clone(), global_value.clone());
            }
            Some(own_value) if own_value.is_mapping() && global_value.is_mapping() => {
                merge_globals(own_value, global_value);
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::resource::ResourceKind;
    use crate::graph::Relation;

    #[test]
    fn test_parse_sam_template_with_short_tags() {
        let yaml = r#"
Resources:
  ApiFunction:
    Type: AWS::Serverless::Function
    Properties:
      Role: !GetAtt ApiRole.Arn
      VpcConfig:
        SecurityGroupIds:
          - !Ref LambdaSg
        SubnetIds:
          - !Ref PrivateSubnet
  ApiRole:
    Type: AWS::IAM::Role
  LambdaSg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: lambda
      SecurityGroupEgress:
        - IpProtocol: -1
          CidrIp: 0.0.0.0/0
  PrivateSubnet:
    Type: AWS::EC2::Subnet
"#;
        let graph = parse_template(yaml, "template.yaml".into()).unwrap();
        assert_eq!(graph.resource_count(), 4);
        assert_eq!(
            graph.targets("ApiFunction", Relation::AttachedRole)[0].id,
            "ApiRole"
        );
        let sg = graph.get("LambdaSg").unwrap();
        assert_eq!(sg.kind, ResourceKind::SecurityGroup);
        assert!(sg.network.egress[0].is_all_protocols());
    }

    #[test]
    fn test_json_long_form_is_accepted() {
        let json = r#"{
  "Resources": {
    "Fn": {
      "Type": "AWS::Lambda::Function",
      "Properties": { "Role": { "Fn::GetAtt": ["Role", "Arn"] } }
    },
    "Role": { "Type": "AWS::IAM::Role" }
  }
}"#;
        let graph = parse_template(json, "template.json".into()).unwrap();
        assert_eq!(graph.targets("Fn", Relation::AttachedRole).len(), 1);
    }

    #[test]
    fn test_missing_reference_is_not_a_parse_error() {
        let yaml = r#"
Resources:
  Fn:
    Type: AWS::Lambda::Function
    Properties:
      Role: !GetAtt GhostRole.Arn
"#;
        let graph = parse_template(yaml, "t.yaml".into()).unwrap();
        assert_eq!(
            graph.get("Fn").unwrap().property("Role"),
            Some(&PropertyValue::Unresolved("GhostRole.Arn".into()))
        );
    }

    #[test]
    fn test_malformed_yaml_is_template_error() {
        let err = parse_template("Resources: [unclosed", "bad.yaml".into()).unwrap_err();
        assert!(matches!(err, ScanError::TemplateParse { .. }));
    }

    #[test]
    fn test_resource_without_type_is_rejected() {
        let err = parse_template("Resources:\n  Thing:\n    Properties: {}\n", "t.yaml".into())
            .unwrap_err();
        assert!(err.to_string().contains("has no Type"));
    }

    #[test]
    fn test_empty_template_is_clean() {
        let graph = parse_template("", "empty.yaml".into()).unwrap();
        assert_eq!(graph.resource_count(), 0);
    }

    #[test]
    fn test_globals_merge_environment() {
        let yaml = r#"
Globals:
  Function:
    Runtime: python3.11
    Environment:
      Variables:
        LOG_LEVEL: info
        SHARED: global
Resources:
  Fn:
    Type: AWS::Serverless::Function
    Properties:
      Environment:
        Variables:
          SHARED: local
"#;
        let graph = parse_template(yaml, "t.yaml".into()).unwrap();
        let vars = graph
            .get("Fn")
            .unwrap()
            .property_path(&["Environment", "Variables"])
            .unwrap()
            .as_map()
            .unwrap()
            .clone();
        assert_eq!(vars["LOG_LEVEL"], PropertyValue::from("info"));
        assert_eq!(vars["SHARED"], PropertyValue::from("local"));
    }

    #[test]
    fn test_load_missing_file_is_template_error() {
        let err = load_template(Path::new("/nonexistent/template.yaml")).unwrap_err();
        assert!(matches!(err, ScanError::TemplateParse { .. }));
    }
}
