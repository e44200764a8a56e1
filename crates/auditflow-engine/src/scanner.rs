//! # Auto-Transition Scanner
//!
//! Periodic pass that moves every active engagement whose commencement date
//! has arrived out of `info_gathering` and into `commencement`, acting as
//! [`Actor::System`] through the lifecycle engine.
//!
//! Each engagement is isolated: a denial or store error increments that
//! engagement's persisted `transition_attempts` counter and the pass moves
//! on. Once the counter reaches the configured maximum the engagement is
//! skipped by every later pass. There is no retry within a pass; the next
//! scheduled run is the retry.
//!
//! Running a pass twice is safe. An engagement that was moved is no longer in
//! the scanned stage, and a lost race surfaces as a failed attempt rather than
//! a double transition.

use std::future::Future;
use std::time::Duration;

use auditflow_core::EngagementId;
use auditflow_state::{Actor, Stage};
use serde::Serialize;

use crate::engine::{LifecycleEngine, TransitionRequest};
use crate::store::{EngagementFilter, StoreError};

/// Reason recorded on every scanner-driven transition.
pub const AUTO_TRANSITION_REASON: &str = "auto_transition_commencement_date_reached";

/// Default circuit-breaker threshold.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Scanner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Failed attempts after which an engagement is skipped.
    pub max_attempts: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Counts from one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Eligible engagements examined.
    pub total: usize,
    /// Moved to the auto-transition target.
    pub transitioned: usize,
    /// Denied or errored; counter incremented.
    pub failed: usize,
    /// At or over the attempt cap.
    pub skipped: usize,
    /// Date unset or still in the future.
    pub not_due: usize,
}

/// Runs auto-transitions through a [`LifecycleEngine`].
#[derive(Debug, Clone)]
pub struct AutoTransitionScanner {
    engine: LifecycleEngine,
}

impl AutoTransitionScanner {
    /// Scanner driving `engine`.
    pub fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    /// One pass over every stage that declares an auto-transition.
    ///
    /// Fails only when the candidate list cannot be loaded.
    pub async fn run(&self, config: &ScannerConfig) -> Result<ScanSummary, StoreError> {
        let registry = self.engine.registry();
        let now = self.engine.clock().now();
        let mut summary = ScanSummary::default();

        for stage in registry.ordered_stages().iter().copied() {
            let Some(auto) = registry.rules_for(stage).auto_transition.clone() else {
                continue;
            };

            let candidates = self
                .engine
                .store()
                .list(&EngagementFilter::active_in(stage))
                .await?;

            for engagement in candidates {
                summary.total += 1;

                if engagement.transition_attempts >= config.max_attempts {
                    tracing::debug!(
                        engagement_id = %engagement.id,
                        attempts = engagement.transition_attempts,
                        "auto-transition skipped: attempt limit reached"
                    );
                    summary.skipped += 1;
                    continue;
                }

                if !auto.condition.holds(&engagement, now) {
                    summary.not_due += 1;
                    continue;
                }

                let request = TransitionRequest::new(engagement.id, auto.to, Actor::System)
                    .with_reason(AUTO_TRANSITION_REASON);
                match self.engine.transition(request).await {
                    Ok(_) => summary.transitioned += 1,
                    Err(e) => {
                        summary.failed += 1;
                        self.record_failure(engagement.id, stage, auto.to, &e.to_string())
                            .await;
                    }
                }
            }
        }

        metrics::counter!("auditflow_scan_runs_total").increment(1);
        tracing::info!(
            total = summary.total,
            transitioned = summary.transitioned,
            failed = summary.failed,
            skipped = summary.skipped,
            not_due = summary.not_due,
            "auto-transition scan complete"
        );
        Ok(summary)
    }

    /// Run a pass every `interval` until `shutdown` resolves.
    ///
    /// The first pass runs immediately. A pass that fails to load candidates
    /// is logged and the loop keeps going.
    pub async fn run_every<F>(&self, config: ScannerConfig, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("auto-transition scanner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run(&config).await {
                        tracing::error!(error = %e, "auto-transition scan failed");
                    }
                }
            }
        }
    }

    async fn record_failure(
        &self,
        id: EngagementId,
        from: Stage,
        to: Stage,
        error: &str,
    ) {
        match self.engine.store().increment_transition_attempts(id).await {
            Ok(attempts) => {
                tracing::warn!(
                    engagement_id = %id,
                    from = %from,
                    to = %to,
                    attempts,
                    error,
                    "auto-transition failed"
                );
            }
            Err(e) => {
                tracing::error!(
                    engagement_id = %id,
                    error = %e,
                    "failed to record auto-transition attempt"
                );
            }
        }
    }
}
