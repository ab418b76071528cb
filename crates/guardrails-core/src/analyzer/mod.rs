pub mod aggregate;

use crate::allowlist::{self, Allowlist};
use crate::config::ScanConfig;
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::report::ScanReport;
use crate::rules::{self, ScanContext};
use crate::source::SourceIndex;
use crate::template;
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;

/// Everything a scan reads. Today's date is explicit so results are reproducible.
#[derive(Debug, Clone)]
pub struct ScanInputs {
    pub template: PathBuf,
    pub sources: Vec<PathBuf>,
    pub allowlist: Option<PathBuf>,
    pub config: ScanConfig,
    pub today: NaiveDate,
}

/// Result of a scan: the aggregated report plus bookkeeping for display.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub suppressed: usize,
    pub resources: usize,
    pub files_scanned: usize,
}

impl ScanOutcome {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

/// Run the full pipeline: template, sources, rules, allowlist, aggregation.
pub fn scan(inputs: &ScanInputs) -> Result<ScanOutcome> {
    let graph = template::load_template(&inputs.template)?;
    info!(
        template = %inputs.template.display(),
        resources = graph.resource_count(),
        edges = graph.edge_count(),
        "template loaded"
    );

    let sources = SourceIndex::build(&graph, &inputs.sources, &inputs.config)?;
    let allowlist = inputs
        .allowlist
        .as_deref()
        .map(Allowlist::load)
        .unwrap_or_default();

    Ok(scan_graph(
        &graph,
        &sources,
        &allowlist,
        &inputs.config,
        inputs.today,
    ))
}

/// Evaluate prepared inputs. Pure with respect to its arguments.
pub fn scan_graph(
    graph: &ResourceGraph,
    sources: &SourceIndex,
    allowlist: &Allowlist,
    config: &ScanConfig,
    today: NaiveDate,
) -> ScanOutcome {
    let ctx = ScanContext {
        graph,
        sources,
        config,
    };
    let raw = rules::run_rules(&rules::registry(), &ctx);
    info!(findings = raw.len(), "rules evaluated");

    let filtered = allowlist::apply(allowlist, raw, today);
    let report = aggregate::aggregate(filtered.findings);
    info!(
        total = report.summary.total(),
        suppressed = filtered.suppressed,
        passed = report.passed,
        "scan complete"
    );

    ScanOutcome {
        report,
        suppressed: filtered.suppressed,
        resources: graph.resource_count(),
        files_scanned: sources.files_scanned,
    }
}
