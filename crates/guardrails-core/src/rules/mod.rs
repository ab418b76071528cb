pub mod env_secret;
pub mod iam_leastpriv;
pub mod vpc_egress;

use crate::config::ScanConfig;
use crate::error::RuleError;
use crate::graph::ResourceGraph;
use crate::report::{Finding, Severity};
use crate::source::SourceIndex;
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Everything a rule may read. Immutable for the duration of a scan.
pub struct ScanContext<'a> {
    pub graph: &'a ResourceGraph,
    pub sources: &'a SourceIndex,
    pub config: &'a ScanConfig,
}

/// A security rule family.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Finding>, RuleError>;
}

/// The fixed set of rules run by every scan.
pub fn registry() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(env_secret::EnvSecretRule),
        Box::new(iam_leastpriv::IamLeastPrivRule),
        Box::new(vpc_egress::VpcEgressRule),
    ]
}

/// Run rules in parallel. A failing or panicking rule yields one execution-error finding.
pub fn run_rules(rules: &[Box<dyn Rule>], ctx: &ScanContext) -> Vec<Finding> {
    rules
        .par_iter()
        .flat_map(|rule| {
            let name = rule.name();
            match catch_unwind(AssertUnwindSafe(|| rule.evaluate(ctx))) {
                Ok(Ok(findings)) => {
                    debug!(rule = name, findings = findings.len(), "rule finished");
                    findings
                }
                Ok(Err(error)) => {
                    warn!(rule = name, error = %error, "rule failed");
                    vec![execution_error(name, &error.to_string())]
                }
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "rule panicked".to_string());
                    warn!(rule = name, panic = %message, "rule panicked");
                    vec![execution_error(name, &message)]
                }
            }
        })
        .collect()
}

fn execution_error(rule: &str, message: &str) -> Finding {
    Finding::new(
        rule,
        Severity::Medium,
        "scan",
        "execution-error",
        format!("Rule '{}' could not complete: {}", rule, message),
        "Fix the rule configuration or report the failure; results for this rule are incomplete.",
    )
}
