use crate::report::{Finding, ScanReport, Summary};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Deduplicate by id (highest severity wins), sort, and summarize.
pub fn aggregate(findings: Vec<Finding>) -> ScanReport {
    let mut by_id: HashMap<String, Finding> = HashMap::with_capacity(findings.len());
    for finding in findings {
        let replace = match by_id.get(&finding.id) {
            None => true,
            // Equal severities resolve on message text.
            Some(existing) => {
                (finding.severity, Reverse(&finding.message))
                    > (existing.severity, Reverse(&existing.message))
            }
        };
        if replace {
            by_id.insert(finding.id.clone(), finding);
        }
    }

    let mut findings: Vec<Finding> = by_id.into_values().collect();
    sort_findings(&mut findings);

    let summary = Summary::from_findings(&findings);
    ScanReport {
        passed: summary.passed(),
        summary,
        findings,
    }
}

/// Severity descending, then rule, resource and id.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        (Reverse(a.severity), &a.rule, &a.resource_id, &a.id).cmp(&(
            Reverse(b.severity),
            &b.rule,
            &b.resource_id,
            &b.id,
        ))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;

    fn finding(rule: &str, severity: Severity, resource: &str, disc: &str) -> Finding {
        Finding::new(rule, severity, resource, disc, "m", "r")
    }

    #[test]
    fn test_duplicates_keep_highest_severity() {
        let report = aggregate(vec![
            finding("env_secret", Severity::Low, "Fn", "a"),
            finding("env_secret", Severity::High, "Fn", "a"),
            finding("env_secret", Severity::Medium, "Fn", "a"),
        ]);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::High);
        assert_eq!(report.summary.high, 1);
        assert!(!report.passed);
    }

    #[test]
    fn test_sort_order() {
        let report = aggregate(vec![
            finding("vpc_egress", Severity::Medium, "Fn", "x"),
            finding("iam_leastpriv", Severity::Critical, "Role", "s1"),
            finding("env_secret", Severity::Medium, "Fn", "y"),
            finding("env_secret", Severity::Medium, "Api", "z"),
            finding("iam_leastpriv", Severity::Critical, "Role", "s0"),
        ]);
        let ids: Vec<&str> = report.findings.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "iam_leastpriv::Role::s0",
                "iam_leastpriv::Role::s1",
                "env_secret::Api::z",
                "env_secret::Fn::y",
                "vpc_egress::Fn::x",
            ]
        );
    }

    #[test]
    fn test_order_is_independent_of_input_order() {
        let input = vec![
            finding("a", Severity::Low, "R", "1"),
            finding("b", Severity::Info, "R", "2"),
            finding("a", Severity::High, "S", "3"),
        ];
        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(aggregate(input), aggregate(reversed));
    }

    #[test]
    fn test_empty_is_clean() {
        let report = aggregate(Vec::new());
        assert!(report.passed);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary.total(), 0);
    }
}
