use super::{Finding, ScanReport, Severity};
use serde_json::json;
use std::collections::BTreeMap;

const INFORMATION_URI: &str = "https://github.com/serverless-guardrails/guardrails";

/// Generate a SARIF 2.1.0 log from a scan report.
///
/// One rule descriptor per distinct rule name. Results keep the report's
/// ordering, so identical reports produce identical logs.
pub fn to_sarif(report: &ScanReport) -> serde_json::Value {
    let mut rule_levels: BTreeMap<&str, Severity> = BTreeMap::new();
    for finding in &report.findings {
        let level = rule_levels
            .entry(finding.rule.as_str())
            .or_insert(finding.severity);
        if finding.severity > *level {
            *level = finding.severity;
        }
    }

    let rules: Vec<serde_json::Value> = rule_levels
        .iter()
        .map(|(name, severity)| sarif_rule(name, *severity))
        .collect();
    let results: Vec<serde_json::Value> = report.findings.iter().map(sarif_result).collect();

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "serverless-guardrails",
                    "version": env!("CARGO_PKG_VERSION"),
                    "informationUri": INFORMATION_URI,
                    "rules": rules,
                }
            },
            "results": results,
            "invocations": [{
                "executionSuccessful": true,
                "toolExecutionNotifications": [],
            }]
        }]
    })
}

fn rule_description(name: &str) -> &'static str {
    match name {
        "env_secret" => "Hardcoded secret in a function environment or source file",
        "iam_leastpriv" => "Permission statement violates least privilege",
        "vpc_egress" => "Unrestricted network egress from a function or security group",
        "allowlist_expired" => "Allowlist exception is expired, undated or malformed",
        _ => "Scanner rule",
    }
}

fn sarif_rule(name: &str, highest: Severity) -> serde_json::Value {
    json!({
        "id": name,
        "name": name,
        "shortDescription": {
            "text": rule_description(name),
        },
        "helpUri": format!("{}#{}", INFORMATION_URI, name.replace('_', "-")),
        "defaultConfiguration": {
            "level": highest.sarif_level(),
        },
    })
}

fn sarif_result(finding: &Finding) -> serde_json::Value {
    let mut location = json!({
        "logicalLocations": [{
            "name": finding.resource_id,
            "kind": "resource",
        }]
    });

    if let Some(file) = &finding.evidence.file {
        let mut physical = json!({
            "artifactLocation": {
                "uri": file,
            }
        });
        if let Some(line) = finding.evidence.line {
            physical["region"] = json!({ "startLine": line });
        }
        location["physicalLocation"] = physical;
    }

    let mut result = json!({
        "ruleId": finding.rule,
        "level": finding.severity.sarif_level(),
        "message": {
            "text": format!("{}\n\nRecommendation: {}", finding.message, finding.recommendation),
        },
        "locations": [location],
        "partialFingerprints": {
            "findingId": finding.id,
        },
        "properties": {
            "severity": finding.severity.symbol(),
        },
    });

    if let Some(related) = &finding.evidence.related_finding {
        result["properties"]["relatedFinding"] = json!(related);
    }

    result
}
