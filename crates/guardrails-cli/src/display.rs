use colored::*;
use guardrails_core::allowlist::{Allowlist, AllowlistEntry, EntryStatus};
use guardrails_core::analyzer::ScanOutcome;
use guardrails_core::report::writer::ReportFormat;
use guardrails_core::report::{Finding, Severity};
use std::path::Path;

const MAX_LISTED: usize = 50;

/// Print the scan summary table and findings to the terminal.
pub fn print_scan_report(template: &Path, outcome: &ScanOutcome) {
    let report = &outcome.report;

    println!();
    println!(
        "{}",
        format!(
            " Serverless Guardrails v{} | Scanning {}",
            env!("CARGO_PKG_VERSION"),
            template.display()
        )
        .bold()
    );
    println!();

    println!(" {}", "Inputs".bold().underline());
    println!(" {} {} resources", "|-".dimmed(), outcome.resources);
    println!(" {} {} source files", "|-".dimmed(), outcome.files_scanned);
    println!(
        " {} {} findings suppressed by allowlist",
        "|-".dimmed(),
        outcome.suppressed
    );
    println!();

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    if report.findings.is_empty() {
        println!(" {} No findings.", "OK".green().bold());
    } else {
        for finding in report.top_findings(MAX_LISTED) {
            print_finding(finding);
            println!();
        }
        if report.findings.len() > MAX_LISTED {
            println!(
                " {} more findings in the written report",
                (report.findings.len() - MAX_LISTED).to_string().bold()
            );
            println!();
        }
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    println!(" {}", "Summary".bold().underline());
    println!("   {:<10} {:>5}", "Severity".dimmed(), "Count".dimmed());
    for severity in Severity::ALL {
        let count = report.summary.count(severity);
        let label = format!("{:<10}", severity.symbol());
        let label = if count > 0 {
            label.color(severity.color_code()).bold().to_string()
        } else {
            label.dimmed().to_string()
        };
        println!("   {} {:>5}", label, count);
    }
    println!("   {:<10} {:>5}", "TOTAL".bold(), report.summary.total());
    println!();

    let verdict = if report.passed {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!(" Result: {} (exit code {})", verdict, report.exit_code());
    println!();
}

fn print_finding(finding: &Finding) {
    let tag = format!(" {} ", finding.severity.symbol());
    let severity_tag = match finding.severity {
        Severity::Critical => tag.on_red().white().bold().to_string(),
        Severity::High => tag.on_yellow().black().bold().to_string(),
        Severity::Medium => tag.on_blue().white().bold().to_string(),
        Severity::Low | Severity::Info => tag.dimmed().to_string(),
    };

    println!(" {} {}", severity_tag, finding.message.bold());
    println!(
        "   {} {} at {}",
        "|".dimmed(),
        finding.rule.cyan(),
        finding.location()
    );
    if let Some(snippet) = &finding.evidence.snippet {
        println!("   {} Value: {}", "|".dimmed(), snippet);
    }
    println!("   {} {}", "|".dimmed(), finding.recommendation.dimmed());
    println!("   {} {}", "|".dimmed(), finding.id.dimmed());
}

pub fn print_written(path: &Path, format: ReportFormat) {
    println!(
        " {} {} report written to {}",
        "->".dimmed(),
        format.to_string().to_uppercase(),
        path.display().to_string().cyan()
    );
}

/// Print each allowlist entry with its expiry status.
pub fn print_allowlist_status(allowlist: &Allowlist, statuses: &[(&AllowlistEntry, EntryStatus)]) {
    println!();
    println!(
        "{}",
        format!(" Allowlist {}", allowlist.source).bold()
    );
    println!();

    if statuses.is_empty() && allowlist.errors.is_empty() {
        println!(" {} No entries.", "OK".green().bold());
        println!();
        return;
    }

    for (entry, status) in statuses {
        let marker = if status.is_active() {
            "OK".green().bold()
        } else {
            "!!".red().bold()
        };
        println!(
            " {} {:<32} {}",
            marker,
            entry.key,
            status.describe()
        );
        if let Some(owner) = &entry.owner {
            println!("    {} owner: {}", "|".dimmed(), owner);
        }
        if let Some(reason) = &entry.reason {
            println!("    {} reason: {}", "|".dimmed(), reason.dimmed());
        }
    }

    for error in &allowlist.errors {
        println!(" {} {}", "!!".red().bold(), error);
    }

    let inactive = statuses.iter().filter(|(_, s)| !s.is_active()).count();
    println!();
    println!(
        " {} entries, {} need attention",
        statuses.len(),
        if inactive + allowlist.errors.len() > 0 {
            (inactive + allowlist.errors.len()).to_string().red().bold()
        } else {
            "0".green()
        }
    );
    println!();
}

pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "error:".red().bold(), err);
}
