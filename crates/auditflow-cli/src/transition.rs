//! # Check and Transition Subcommands
//!
//! `check` asks the validator whether a transition would be accepted;
//! `transition` applies it. Both act as a user with the given role. A refusal
//! is printed as a JSON object carrying the reason code and HTTP status an
//! API would answer with.
//!
//! Both look up an existing engagement, so both require `DATABASE_URL`.
//! The in-memory store starts empty and every lookup would miss.

use anyhow::{bail, Result};
use auditflow_core::{ActorId, EngagementId};
use auditflow_engine::{AuditflowConfig, LifecycleEngine, LifecycleError, TransitionRequest};
use auditflow_state::{Actor, Role, Stage};
use clap::Args;
use serde_json::json;

use crate::runtime::build_engine;
use crate::EXIT_REFUSED;

/// Target engagement, destination, and acting user.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Engagement identifier (bare UUID or `engagement:<uuid>`).
    #[arg(long)]
    pub engagement: EngagementId,
    /// Destination stage (e.g. `partner_review`).
    #[arg(long)]
    pub to: Stage,
    /// Role of the acting user.
    #[arg(long)]
    pub role: Role,
    /// Acting user identifier. A random one is used when omitted.
    #[arg(long)]
    pub actor: Option<ActorId>,
}

impl TargetArgs {
    fn actor(&self) -> Actor {
        Actor::user(self.actor.unwrap_or_default(), self.role)
    }
}

/// Arguments for the `auditflow check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

/// Arguments for the `auditflow transition` subcommand.
#[derive(Args, Debug)]
pub struct TransitionArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Free-text reason recorded in the activity log.
    #[arg(long)]
    pub reason: Option<String>,
}

/// Execute `auditflow check`.
pub async fn run_check(args: &CheckArgs, config: &AuditflowConfig) -> Result<u8> {
    require_database(config, "check")?;
    let engine = build_engine(config).await?;
    check(&engine, &args.target).await
}

/// Execute `auditflow transition`.
pub async fn run_transition(args: &TransitionArgs, config: &AuditflowConfig) -> Result<u8> {
    require_database(config, "transition")?;
    let engine = build_engine(config).await?;
    transition(&engine, args).await
}

fn require_database(config: &AuditflowConfig, command: &str) -> Result<()> {
    if config.database_url.is_none() {
        bail!("`auditflow {command}` reads an existing engagement and needs DATABASE_URL");
    }
    Ok(())
}

async fn check(engine: &LifecycleEngine, target: &TargetArgs) -> Result<u8> {
    match engine
        .validate(target.engagement, target.to, target.actor(), None)
        .await
    {
        Ok(approved) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "allowed": true, "transition": approved }))?
            );
            Ok(0)
        }
        Err(err) => refused(err),
    }
}

async fn transition(engine: &LifecycleEngine, args: &TransitionArgs) -> Result<u8> {
    let target = &args.target;
    let mut request = TransitionRequest::new(target.engagement, target.to, target.actor());
    if let Some(reason) = &args.reason {
        request = request.with_reason(reason.clone());
    }

    match engine.transition(request).await {
        Ok(engagement) => {
            println!("{}", serde_json::to_string_pretty(&engagement)?);
            Ok(0)
        }
        Err(err) => refused(err),
    }
}

/// Print a refusal, or propagate an infrastructure failure.
fn refused(err: LifecycleError) -> Result<u8> {
    let Some(code) = err.code() else {
        return Err(err.into());
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "allowed": false,
            "code": code,
            "status": err.http_status(),
            "message": err.to_string(),
        }))?
    );
    Ok(EXIT_REFUSED)
}
