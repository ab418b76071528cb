use super::{Rule, ScanContext};
use crate::config::IamConfig;
use crate::error::RuleError;
use crate::graph::resource::ResourceKind;
use crate::graph::statements::{policy_statements, Effect, PolicyStatement};
use crate::graph::Relation;
use crate::report::{Evidence, Finding, Severity};
use crate::template::value::PropertyValue;

pub const RULE_NAME: &str = "iam_leastpriv";

const RECOMMENDATION: &str = "Scope actions to the specific API calls the function makes and \
resources to explicit ARNs; add conditions where a wildcard cannot be avoided.";

/// Flags permission statements that grant more than a function needs.
pub struct IamLeastPrivRule;

impl Rule for IamLeastPrivRule {
    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Finding>, RuleError> {
        let mut findings: Vec<Finding> = policy_statements(ctx.graph)
            .iter()
            .filter_map(|statement| evaluate_statement(statement, &ctx.config.iam))
            .collect();

        for function in ctx.graph.resources_of_kind(ResourceKind::Function) {
            let unverifiable = match function.property("Role") {
                None => None,
                Some(PropertyValue::Unresolved(name)) => Some(name.clone()),
                Some(_) => ctx
                    .graph
                    .targets(&function.id, Relation::AttachedRole)
                    .into_iter()
                    .find(|role| role.kind == ResourceKind::External)
                    .map(|role| role.id.clone()),
            };
            if let Some(role) = unverifiable {
                findings.push(Finding::new(
                    RULE_NAME,
                    Severity::Info,
                    &function.id,
                    "unverifiable-role",
                    format!(
                        "Function '{}' uses role '{}' defined outside this template; least privilege cannot be verified",
                        function.id, role
                    ),
                    "Define the execution role in the same template or review its policies separately.",
                ));
            }
        }

        Ok(findings)
    }
}

/// Classify one statement. Deny statements and narrow grants produce nothing.
pub fn evaluate_statement(statement: &PolicyStatement, config: &IamConfig) -> Option<Finding> {
    if statement.effect == Effect::Deny {
        return None;
    }

    let any_action = statement.actions.iter().any(|a| a == "*");
    let any_resource = statement.resources.iter().any(|r| is_wildcard_resource(r));
    let risky_wildcard = statement
        .actions
        .iter()
        .filter(|a| a.contains('*'))
        .find(|a| is_high_risk_namespace(a, config));
    let risky_action = statement.actions.iter().find(|a| {
        config
            .high_risk_actions
            .iter()
            .any(|h| h.eq_ignore_ascii_case(a))
    });
    let any_wildcard = statement.actions.iter().any(|a| a.contains('*'));

    let (severity, kind, issue) = if any_action && any_resource {
        (
            Severity::Critical,
            "full-wildcard",
            "grants every action on every resource".to_string(),
        )
    } else if let Some(action) = risky_wildcard {
        (
            Severity::High,
            "sensitive-wildcard",
            format!("grants wildcard action '{}' in a sensitive service", action),
        )
    } else if let (Some(action), true) = (risky_action, any_resource) {
        (
            Severity::Medium,
            "sensitive-action",
            format!("grants sensitive action '{}' on every resource", action),
        )
    } else if any_wildcard && any_resource {
        (
            Severity::Low,
            "broad-wildcard",
            "grants wildcard actions on every resource".to_string(),
        )
    } else {
        return None;
    };

    let (severity, qualifier) = if statement.has_conditions() {
        (severity.downgrade(), " (mitigated by conditions)")
    } else {
        (severity, "")
    };

    Some(
        Finding::new(
            RULE_NAME,
            severity,
            &statement.owner,
            &statement.discriminator(),
            format!(
                "Statement {} of '{}' {}{}. Actions: [{}]; Resources: [{}]",
                statement.path,
                statement.owner,
                issue,
                qualifier,
                statement.actions.join(", "),
                statement.resources.join(", ")
            ),
            RECOMMENDATION,
        )
        .with_evidence(Evidence {
            key: Some(statement.path.clone()),
            detector: Some(kind.to_string()),
            ..Evidence::default()
        }),
    )
}

fn is_high_risk_namespace(action: &str, config: &IamConfig) -> bool {
    let namespace = action.split(':').next().unwrap_or(action);
    config
        .high_risk_namespaces
        .iter()
        .any(|ns| ns.eq_ignore_ascii_case(namespace))
}

/// `*`, or an ARN whose resource segment is nothing but wildcards
/// (`arn:aws:s3:::*`, `arn:aws:dynamodb:*:*:*`). `bucket/*` stays scoped.
fn is_wildcard_resource(resource: &str) -> bool {
    if resource == "*" {
        return true;
    }
    if !resource.starts_with("arn:") {
        return false;
    }
    match resource.splitn(6, ':').nth(5) {
        Some(segment) => !segment.is_empty() && segment.chars().all(|c| c == '*'),
        None => false,
    }
}
