pub mod allowlist;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod graph;
pub mod report;
pub mod rules;
pub mod source;
pub mod template;

pub use allowlist::{Allowlist, AllowlistEntry, EntryStatus};
pub use analyzer::{scan, scan_graph, ScanInputs, ScanOutcome};
pub use config::{load_config, ScanConfig};
pub use error::{Result, RuleError, ScanError};
pub use graph::ResourceGraph;
pub use report::writer::{write_report, ReportFormat};
pub use report::{Finding, ScanReport, Severity, Summary};
pub use template::load_template;
