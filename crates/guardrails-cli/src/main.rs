mod display;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use guardrails_core::allowlist::{Allowlist, DEFAULT_ALLOWLIST};
use guardrails_core::config::{self, ScanConfig};
use guardrails_core::report::writer::{self, ReportFormat};
use guardrails_core::{analyzer, graph, template, ScanError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Fatal analysis failure: template, source or configuration could not be read.
const EXIT_ANALYSIS_ERROR: u8 = 3;
/// The scan completed but a report could not be written.
const EXIT_OUTPUT_ERROR: u8 = 4;

#[derive(Parser)]
#[command(
    name = "guardrails",
    version,
    about = "Serverless Guardrails: static security scanner for serverless templates",
    long_about = "Scan an infrastructure template and its function sources for hardcoded secrets,\n\
                  over-broad permissions and unrestricted network egress."
)]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a template and its function sources
    Scan {
        /// Path to the infrastructure template (YAML or JSON)
        #[arg(short, long)]
        template: PathBuf,

        /// Function source directory (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<PathBuf>,

        /// Allowlist file with time-boxed exceptions
        #[arg(long, default_value = DEFAULT_ALLOWLIST)]
        allowlist: PathBuf,

        /// Scanner configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the report to this file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Format of the --out report
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Additionally write a SARIF log to this file
        #[arg(long)]
        sarif: Option<PathBuf>,

        /// Evaluate allowlist expiry as of this date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Check every allowlist entry for a valid, future expiry date
    ValidateAllowlist {
        /// Allowlist file to check
        #[arg(long, default_value = DEFAULT_ALLOWLIST)]
        allowlist: PathBuf,

        /// Evaluate expiry as of this date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Print the resolved resource graph
    Graph {
        /// Path to the infrastructure template
        #[arg(short, long)]
        template: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "mermaid")]
        format: GraphFormat,
    },

    /// Print a starter configuration file
    InitConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Sarif,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Sarif => ReportFormat::Sarif,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Mermaid,
    Dot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Scan {
            template,
            sources,
            allowlist,
            config,
            out,
            format,
            sarif,
            as_of,
        } => cmd_scan(ScanArgs {
            template,
            sources,
            allowlist,
            config,
            out,
            format: format.into(),
            sarif,
            today: as_of.unwrap_or_else(today),
        }),
        Commands::ValidateAllowlist { allowlist, as_of } => {
            cmd_validate_allowlist(&allowlist, as_of.unwrap_or_else(today))
        }
        Commands::Graph { template, format } => cmd_graph(&template, format),
        Commands::InitConfig => cmd_init_config(),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            display::print_error(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ScanError>() {
        Some(ScanError::OutputWrite { .. }) => EXIT_OUTPUT_ERROR,
        _ => EXIT_ANALYSIS_ERROR,
    }
}

struct ScanArgs {
    template: PathBuf,
    sources: Vec<PathBuf>,
    allowlist: PathBuf,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    format: ReportFormat,
    sarif: Option<PathBuf>,
    today: NaiveDate,
}

fn cmd_scan(args: ScanArgs) -> Result<u8> {
    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ScanConfig::default(),
    };
    debug!(today = %args.today, "starting scan");

    let inputs = analyzer::ScanInputs {
        template: args.template.clone(),
        sources: args.sources.clone(),
        allowlist: Some(args.allowlist.clone()),
        config,
        today: args.today,
    };
    let outcome = analyzer::scan(&inputs)?;

    display::print_scan_report(&args.template, &outcome);

    if let Some(out) = &args.out {
        writer::write_report(&outcome.report, out, args.format)?;
        display::print_written(out, args.format);
    }
    if let Some(sarif) = &args.sarif {
        writer::write_report(&outcome.report, sarif, ReportFormat::Sarif)?;
        display::print_written(sarif, ReportFormat::Sarif);
    }

    Ok(exit_byte(outcome.exit_code()))
}

fn cmd_validate_allowlist(path: &Path, today: NaiveDate) -> Result<u8> {
    let allowlist = Allowlist::load(path);
    let statuses = allowlist.statuses(today);
    display::print_allowlist_status(&allowlist, &statuses);

    let healthy = allowlist.errors.is_empty() && statuses.iter().all(|(_, s)| s.is_active());
    Ok(if healthy { 0 } else { 1 })
}

fn cmd_graph(path: &Path, format: GraphFormat) -> Result<u8> {
    let graph = template::load_template(path)
        .with_context(|| format!("cannot build resource graph for {}", path.display()))?;
    let rendered = match format {
        GraphFormat::Mermaid => graph::to_mermaid(&graph),
        GraphFormat::Dot => graph::to_dot(&graph),
    };
    print!("{}", rendered);
    Ok(0)
}

fn cmd_init_config() -> Result<u8> {
    print!("{}", config::generate_default_config());
    Ok(0)
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_ANALYSIS_ERROR)
}
