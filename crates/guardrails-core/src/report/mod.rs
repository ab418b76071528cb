pub mod sarif;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Severity level for scan findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    pub fn color_code(&self) -> &str {
        match self {
            Severity::Critical => "red",
            Severity::High => "red",
            Severity::Medium => "yellow",
            Severity::Low => "blue",
            Severity::Info => "white",
        }
    }

    /// One step less severe; `Info` stays `Info`.
    pub fn downgrade(self) -> Severity {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::Info => Severity::Info,
        }
    }

    /// SARIF result level.
    pub fn sarif_level(&self) -> &'static str {
        match self {
            Severity::Critical | Severity::High => "error",
            Severity::Medium => "warning",
            Severity::Low | Severity::Info => "note",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// Supporting detail for a finding. All fields are optional; rules fill what they know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Id of the finding this one re-classifies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_finding: Option<String>,
}

/// A single security finding tied to one rule and one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub rule: String,
    pub severity: Severity,
    pub resource_id: String,
    pub message: String,
    pub recommendation: String,
    pub evidence: Evidence,
}

impl Finding {
    pub fn new(
        rule: &str,
        severity: Severity,
        resource_id: &str,
        discriminator: &str,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            id: finding_id(rule, resource_id, discriminator),
            rule: rule.to_string(),
            severity,
            resource_id: resource_id.to_string(),
            message: message.into(),
            recommendation: recommendation.into(),
            evidence: Evidence::default(),
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Location string for terminal output.
    pub fn location(&self) -> String {
        match (&self.evidence.file, self.evidence.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => format!("{} ({})", file, self.resource_id),
            _ => self.resource_id.clone(),
        }
    }
}

/// Deterministic finding id: `rule::resource_id::discriminator`.
pub fn finding_id(rule: &str, resource_id: &str, discriminator: &str) -> String {
    format!("{}::{}::{}", rule, resource_id, discriminator)
}

/// Finding counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl Summary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Summary::default();
        for finding in findings {
            summary.increment(finding.severity);
        }
        summary
    }

    pub fn increment(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        Severity::ALL.iter().map(|s| self.count(*s)).sum()
    }

    /// True iff no critical or high findings are present.
    pub fn passed(&self) -> bool {
        self.critical == 0 && self.high == 0
    }

    /// Fixed exit-code policy: 2 for critical/high, 1 for medium, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.critical > 0 || self.high > 0 {
            2
        } else if self.medium > 0 {
            1
        } else {
            0
        }
    }
}

/// The aggregated result of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub summary: Summary,
    pub findings: Vec<Finding>,
    pub passed: bool,
}

impl ScanReport {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }

    pub fn top_findings(&self, limit: usize) -> &[Finding] {
        &self.findings[..self.findings.len().min(limit)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_downgrade_saturates_at_info() {
        assert_eq!(Severity::Critical.downgrade(), Severity::High);
        assert_eq!(Severity::Low.downgrade(), Severity::Info);
        assert_eq!(Severity::Info.downgrade(), Severity::Info);
    }

    #[test]
    fn test_severity_serializes_upper_case() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }

    #[test]
    fn test_exit_code_is_monotonic() {
        let mut summary = Summary::default();
        assert_eq!(summary.exit_code(), 0);
        summary.increment(Severity::Info);
        summary.increment(Severity::Low);
        assert_eq!(summary.exit_code(), 0);
        summary.increment(Severity::Medium);
        assert_eq!(summary.exit_code(), 1);
        summary.increment(Severity::High);
        assert_eq!(summary.exit_code(), 2);
        summary.increment(Severity::Critical);
        assert_eq!(summary.exit_code(), 2);
    }

    #[test]
    fn test_passed_ignores_medium() {
        let summary = Summary {
            medium: 3,
            low: 1,
            ..Default::default()
        };
        assert!(summary.passed());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_finding_id_format() {
        let finding = Finding::new(
            "iam_leastpriv",
            Severity::High,
            "FunctionRole",
            "Policies[0]",
            "msg",
            "fix",
        );
        assert_eq!(finding.id, "iam_leastpriv::FunctionRole::Policies[0]");
    }
}
