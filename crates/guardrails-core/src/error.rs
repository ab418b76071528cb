use std::path::PathBuf;
use thiserror::Error;

/// Fatal scanner errors. Anything not listed here degrades into a finding.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The infrastructure document is missing or malformed.
    #[error("failed to parse template {path}: {message}")]
    TemplateParse { path: PathBuf, message: String },

    /// A source directory is missing or unreadable.
    #[error("failed to read source directory {path}: {message}")]
    SourceRead { path: PathBuf, message: String },

    /// The configuration file could not be loaded.
    #[error("failed to load configuration {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// A report could not be written. Kept apart from analysis failures.
    #[error("failed to write report {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub fn template(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ScanError::TemplateParse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn source_read(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ScanError::SourceRead {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True when the scan never produced a report (as opposed to a write failure).
    pub fn is_analysis_failure(&self) -> bool {
        !matches!(self, ScanError::OutputWrite { .. })
    }
}

/// Failure inside a single rule. Converted to a finding by the rule runner.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("{0}")]
    Evaluation(String),
}

/// A malformed allowlist document or entry. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("allowlist entry {location}: {message}")]
pub struct AllowlistFormatError {
    pub location: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ScanError>;
