//! # auditflow CLI entry point
//!
//! Parses command-line arguments, loads environment configuration, installs
//! the tracing subscriber, and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use auditflow_cli::rules::{run_rules, RulesArgs};
use auditflow_cli::scan::{run_scan, ScanArgs};
use auditflow_cli::transition::{run_check, run_transition, CheckArgs, TransitionArgs};
use auditflow_engine::{AuditflowConfig, LogFormat};

/// Engagement lifecycle engine.
///
/// Validates stage rules, runs commencement-date auto-transitions, and
/// checks or applies stage transitions for audit engagements.
#[derive(Parser, Debug)]
#[command(name = "auditflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate stage rules; print the resolved registry.
    Rules(RulesArgs),

    /// Run the auto-transition scanner.
    Scan(ScanArgs),

    /// Pre-check a stage transition without applying it. Requires DATABASE_URL.
    Check(CheckArgs),

    /// Apply a stage transition. Requires DATABASE_URL.
    Transition(TransitionArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AuditflowConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("auditflow: invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    init_tracing(config.log_format);
    tracing::debug!(?config, "configuration loaded");

    let result = match &cli.command {
        Commands::Rules(args) => run_rules(args, &config),
        Commands::Scan(args) => run_scan(args, &config).await,
        Commands::Check(args) => run_check(args, &config).await,
        Commands::Transition(args) => run_transition(args, &config).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
