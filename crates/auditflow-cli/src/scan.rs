//! # Scan Subcommand
//!
//! Runs the auto-transition scanner, either a single pass or as a daemon on
//! `AUDITFLOW_SCAN_INTERVAL_SECS` until Ctrl-C.

use anyhow::{Context, Result};
use auditflow_engine::{AuditflowConfig, AutoTransitionScanner};
use clap::Args;

use crate::runtime::build_engine;

/// Arguments for the `auditflow scan` subcommand.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Run one pass, print the summary, and exit.
    #[arg(long)]
    pub once: bool,
}

/// Execute `auditflow scan`.
pub async fn run_scan(args: &ScanArgs, config: &AuditflowConfig) -> Result<u8> {
    let scanner = AutoTransitionScanner::new(build_engine(config).await?);
    let scanner_config = config.scanner_config();

    if args.once {
        let summary = scanner
            .run(&scanner_config)
            .await
            .context("auto-transition scan failed")?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }

    tracing::info!(
        interval_secs = config.scan_interval.as_secs(),
        max_attempts = scanner_config.max_attempts,
        "auto-transition scanner started"
    );
    scanner
        .run_every(scanner_config, config.scan_interval, shutdown_signal())
        .await;
    Ok(0)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C; stopping scanner");
    }
}
