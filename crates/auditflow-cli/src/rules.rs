//! # Rules Subcommand
//!
//! Loads a stage-rule file, runs the same load-time validation the engine
//! applies at startup, and prints the resolved registry as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use auditflow_engine::AuditflowConfig;
use auditflow_state::StageRegistry;
use clap::Args;

/// Arguments for the `auditflow rules` subcommand.
#[derive(Args, Debug)]
pub struct RulesArgs {
    /// Stage-rule file to validate. Defaults to `AUDITFLOW_STAGE_RULES`,
    /// then to the built-in rules.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

/// Resolve the registry `args` points at.
pub fn resolve_registry(args: &RulesArgs, config: &AuditflowConfig) -> Result<StageRegistry> {
    match &args.file {
        Some(path) => StageRegistry::from_file(path)
            .with_context(|| format!("invalid stage rules in {}", path.display())),
        None => config.load_registry().context("invalid stage rules"),
    }
}

/// Execute `auditflow rules`.
pub fn run_rules(args: &RulesArgs, config: &AuditflowConfig) -> Result<u8> {
    let registry = resolve_registry(args, config)?;
    println!("{}", serde_json::to_string_pretty(&registry)?);
    tracing::info!(
        workflow = registry.workflow(),
        stages = registry.ordered_stages().len(),
        "stage rules valid"
    );
    Ok(0)
}
