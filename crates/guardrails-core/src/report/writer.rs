use super::{sarif, ScanReport};
use crate::error::{Result, ScanError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Serialized report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Sarif,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Sarif => write!(f, "sarif"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "sarif" => Ok(ReportFormat::Sarif),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Pretty-printed `{summary, findings, passed}` record.
pub fn to_json(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn to_sarif_string(report: &ScanReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&sarif::to_sarif(report))
}

pub fn render(report: &ScanReport, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Json => to_json(report),
        ReportFormat::Sarif => to_sarif_string(report),
    }
}

/// Serialize and write a report, creating parent directories.
pub fn write_report(report: &ScanReport, path: &Path, format: ReportFormat) -> Result<()> {
    let output_error = |source: std::io::Error| ScanError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut content = render(report, format).map_err(|e| output_error(e.into()))?;
    content.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(output_error)?;
    }
    std::fs::write(path, content).map_err(output_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Finding, Severity, Summary};

    fn report() -> ScanReport {
        let findings = vec![Finding::new(
            "iam_leastpriv",
            Severity::Critical,
            "Role",
            "s0",
            "wildcard",
            "scope it",
        )];
        ScanReport {
            summary: Summary::from_findings(&findings),
            passed: false,
            findings,
        }
    }

    #[test]
    fn test_json_shape() {
        let json = to_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["critical"], 1);
        assert_eq!(value["passed"], false);
        assert_eq!(value["findings"][0]["severity"], "CRITICAL");
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/nested/scan.sarif");
        write_report(&report(), &path, ReportFormat::Sarif).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"2.1.0\""));
    }

    #[test]
    fn test_write_failure_is_output_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = write_report(&report(), &blocker.join("scan.json"), ReportFormat::Json)
            .unwrap_err();
        assert!(matches!(err, ScanError::OutputWrite { .. }));
        assert!(!err.is_analysis_failure());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("SARIF".parse::<ReportFormat>(), Ok(ReportFormat::Sarif));
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
