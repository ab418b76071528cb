use crate::error::{Result, ScanError};
use crate::report::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scanner configuration loaded from a TOML file (e.g. `guardrails.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub iam: IamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Quoted literals shorter than this are not extracted from source files.
    #[serde(default = "default_min_literal_length")]
    pub min_literal_length: usize,

    /// Minimum Shannon entropy (bits per character) for the generic detector.
    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold: f64,

    /// Minimum value length for the generic detector.
    #[serde(default = "default_entropy_min_length")]
    pub entropy_min_length: usize,

    /// Substrings that mark a value as a placeholder.
    #[serde(default = "default_placeholder_hints")]
    pub placeholder_hints: Vec<String>,

    /// Extra detectors, run after the built-in ones.
    #[serde(default)]
    pub extra_patterns: Vec<ExtraPattern>,
}

/// A user-supplied secret detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraPattern {
    pub name: String,
    pub regex: String,
    #[serde(default = "default_extra_severity")]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory names skipped anywhere in a source tree.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamConfig {
    /// Service prefixes where a wildcard action is high risk. `*` means any.
    #[serde(default = "default_high_risk_namespaces")]
    pub high_risk_namespaces: Vec<String>,

    /// Individual actions that should never be granted on `*`.
    #[serde(default = "default_high_risk_actions")]
    pub high_risk_actions: Vec<String>,
}

fn default_min_literal_length() -> usize {
    8
}

fn default_entropy_threshold() -> f64 {
    3.5
}

fn default_entropy_min_length() -> usize {
    20
}

fn default_placeholder_hints() -> Vec<String> {
    ["dummy", "example", "placeholder", "sample", "changeme", "retrieved", "xxxx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_extra_severity() -> Severity {
    Severity::High
}

fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        ".venv",
        "venv",
        "target",
        ".aws-sam",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_high_risk_namespaces() -> Vec<String> {
    ["*", "iam", "sts", "organizations", "kms", "s3"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_high_risk_actions() -> Vec<String> {
    [
        "iam:PassRole",
        "iam:CreateUser",
        "iam:AttachRolePolicy",
        "iam:PutRolePolicy",
        "iam:UpdateAssumeRolePolicy",
        "kms:CreateGrant",
        "kms:Decrypt",
        "kms:ScheduleKeyDeletion",
        "s3:PutObject",
        "s3:GetObject",
        "s3:DeleteObject",
        "sts:AssumeRole",
        "lambda:AddPermission",
        "lambda:UpdateFunctionCode",
        "secretsmanager:GetSecretValue",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            min_literal_length: default_min_literal_length(),
            entropy_threshold: default_entropy_threshold(),
            entropy_min_length: default_entropy_min_length(),
            placeholder_hints: default_placeholder_hints(),
            extra_patterns: Vec::new(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            high_risk_namespaces: default_high_risk_namespaces(),
            high_risk_actions: default_high_risk_actions(),
        }
    }
}

/// Load scanner configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScanError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_config(&content).map_err(|message| ScanError::Config {
        path: path.to_path_buf(),
        message,
    })
}

fn parse_config(content: &str) -> std::result::Result<ScanConfig, String> {
    toml::from_str(content).map_err(|e| e.to_string())
}

/// Generate a documented default configuration file.
pub fn generate_default_config() -> String {
    r#"# Serverless Guardrails configuration

[secrets]
# Quoted literals shorter than this are ignored in source files
min_literal_length = 8

# Generic high-entropy detector thresholds
entropy_threshold = 3.5
entropy_min_length = 20

# Values containing any of these are treated as placeholders
placeholder_hints = ["dummy", "example", "placeholder", "sample", "changeme", "retrieved", "xxxx"]

# Extra detectors, evaluated after the built-in ones
# [[secrets.extra_patterns]]
# name = "slack-webhook"
# regex = "https://hooks\\.slack\\.com/services/\\S+"
# severity = "HIGH"

[source]
exclude_dirs = [".git", "node_modules", "__pycache__", ".venv", "venv", "target", ".aws-sam"]
max_file_bytes = 1048576

[iam]
# Service prefixes where a wildcard action is high risk ("*" means any service)
high_risk_namespaces = ["*", "iam", "sts", "organizations", "kms", "s3"]

# Actions that should never be granted on Resource "*"
high_risk_actions = [
    "iam:PassRole",
    "iam:CreateUser",
    "iam:AttachRolePolicy",
    "iam:PutRolePolicy",
    "iam:UpdateAssumeRolePolicy",
    "kms:CreateGrant",
    "kms:Decrypt",
    "kms:ScheduleKeyDeletion",
    "s3:PutObject",
    "s3:GetObject",
    "s3:DeleteObject",
    "sts:AssumeRole",
    "lambda:AddPermission",
    "lambda:UpdateFunctionCode",
    "secretsmanager:GetSecretValue",
]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_text_matches_defaults() {
        let parsed = parse_config(&generate_default_config()).unwrap();
        assert_eq!(parsed, ScanConfig::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed = parse_config(
            r#"
[secrets]
min_literal_length = 12

[[secrets.extra_patterns]]
name = "internal-token"
regex = "itk_[a-z0-9]{16}"
"#,
        )
        .unwrap();
        assert_eq!(parsed.secrets.min_literal_length, 12);
        assert_eq!(parsed.secrets.entropy_threshold, 3.5);
        assert_eq!(parsed.secrets.extra_patterns[0].severity, Severity::High);
        assert_eq!(parsed.source, SourceConfig::default());
        assert!(parsed.iam.high_risk_namespaces.contains(&"kms".to_string()));
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(parse_config("").unwrap(), ScanConfig::default());
    }

    #[test]
    fn test_load_invalid_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guardrails.toml");
        std::fs::write(&path, "[secrets\nmin_literal_length = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ScanError::Config { .. }));
    }
}
