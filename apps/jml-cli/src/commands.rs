//! Subcommand implementations.
//!
//! Each command returns the text to print on stdout so the binary stays a
//! thin dispatcher and the commands can be tested directly.

use std::path::PathBuf;

use clap::Args;
use jml_engine::EngineConfig;
use serde_json::json;

use crate::error::{CliError, CliResult};
use crate::scenario::Scenario;

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// Scenario file (JSON)
    pub scenario: PathBuf,

    /// Pretty-print the JSON result
    #[arg(long)]
    pub pretty: bool,

    /// Print only counts instead of the full result
    #[arg(long)]
    pub summary: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Scenario file (JSON) whose rules, sources and policies are checked
    pub scenario: PathBuf,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Pretty-print the JSON result
    #[arg(long)]
    pub pretty: bool,
}

fn to_json(value: &impl serde::Serialize, pretty: bool) -> CliResult<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

/// Run a scenario through the full pipeline.
pub async fn evaluate(args: EvaluateArgs, config: EngineConfig) -> CliResult<String> {
    let scenario = Scenario::load(&args.scenario)?;
    let problems = scenario.validate();
    if !problems.is_empty() {
        return Err(CliError::Validation(problems.join("; ")));
    }

    let engine = scenario.build_engine(config).await?;
    let report = scenario.run(&engine).await?;
    tracing::info!(
        changes = report.changes.len(),
        requests = report.requests_assembled(),
        refused = report.refused(),
        "Scenario evaluated"
    );

    if args.summary {
        to_json(
            &json!({
                "changes": report.changes.len(),
                "requests": report.requests_assembled(),
                "refused": report.refused(),
                "rules_fired": report.rule_metrics.len(),
                "open_conflicts": report.open_conflicts,
                "audit_events": report.audit_events,
            }),
            args.pretty,
        )
    } else {
        to_json(&report, args.pretty)
    }
}

/// Validate a scenario's definitions without evaluating anything.
pub fn validate_rules(args: ValidateArgs) -> CliResult<String> {
    let scenario = Scenario::load(&args.scenario)?;
    let problems = scenario.validate();
    if problems.is_empty() {
        Ok(format!(
            "OK: {} sources, {} rules, {} birthright policies, {} SoD rules",
            scenario.sources.len(),
            scenario.rules.len(),
            scenario.birthright_policies.len(),
            scenario.sod_rules.len(),
        ))
    } else {
        for problem in &problems {
            tracing::error!(problem = %problem, "Invalid definition");
        }
        Err(CliError::Validation(format!(
            "{} problem(s): {}",
            problems.len(),
            problems.join("; ")
        )))
    }
}

/// Show the effective engine configuration.
pub fn show_config(args: &ConfigArgs, config: &EngineConfig) -> CliResult<String> {
    to_json(config, args.pretty)
}
