//! # Lifecycle Engine
//!
//! Orchestrates one stage transition end to end:
//!
//! 1. resolve the workflow name against the registry,
//! 2. load the engagement,
//! 3. validate with [`validate_transition`], against the stored record and,
//!    when field changes are bundled, against the record as it would be saved,
//! 4. compare-and-swap the stage (with any bundled field changes), guarded on
//!    the stage and gate inputs that were validated,
//! 5. dispatch the destination's `on_enter` actions on detached tasks,
//! 6. append a `stage_change` activity entry.
//!
//! Denials never mutate the engagement. A denial for missing authority is
//! additionally written to the activity log and logged at `warn`.
//!
//! Side effects run after the stage is persisted and are never rolled back:
//! a failed or timed-out email is logged and the transition stands.

use std::sync::Arc;
use std::time::Duration;

use auditflow_core::{Clock, EngagementId};
use auditflow_state::{
    allowed_targets, validate_transition, Actor, ApprovedTransition, Engagement,
    EngagementChanges, ReasonCode, Stage, StageRegistry, TransitionContext, TransitionDenial,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::ActivityEntry;
use crate::notify::{NotificationContext, NotificationDispatcher};
use crate::store::{ActivityLog, EngagementStore, StoreError};

/// Default bound on one on-enter side effect.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from the lifecycle engine.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The validator refused the request.
    #[error(transparent)]
    Denied(#[from] TransitionDenial),

    /// No engagement with this identifier.
    #[error("engagement {0} not found")]
    NotFound(EngagementId),

    /// The stage or a gate input changed between validation and the write.
    #[error("engagement {id} changed after it was validated in {expected}")]
    Conflict {
        /// Subject engagement.
        id: EngagementId,
        /// Stage the request was validated against.
        expected: Stage,
    },

    /// The workflow name does not match the registry.
    #[error("unknown workflow {0:?}")]
    UnknownWorkflow(String),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl LifecycleError {
    /// Reason code for API responses; `None` for infrastructure failures.
    pub fn code(&self) -> Option<ReasonCode> {
        match self {
            Self::Denied(denial) => Some(denial.code),
            Self::NotFound(_) => Some(ReasonCode::EntityNotFound),
            Self::Conflict { .. } => Some(ReasonCode::StageConflict),
            Self::UnknownWorkflow(_) => Some(ReasonCode::UnknownWorkflow),
            Self::Store(_) => None,
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        self.code().map_or(500, |code| code.http_status())
    }
}

// ─── Requests ────────────────────────────────────────────────────────

/// A requested stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Subject engagement.
    pub engagement_id: EngagementId,
    /// Workflow name; must match the registry.
    pub workflow: String,
    /// Destination stage.
    pub to: Stage,
    /// Who is asking.
    pub actor: Actor,
    /// Free-text reason for the activity log.
    #[serde(default)]
    pub reason: Option<String>,
    /// Field changes applied together with the stage change.
    #[serde(default)]
    pub changes: EngagementChanges,
}

impl TransitionRequest {
    /// A bare stage change in the standard workflow.
    pub fn new(engagement_id: EngagementId, to: Stage, actor: Actor) -> Self {
        Self {
            engagement_id,
            workflow: auditflow_state::ENGAGEMENT_WORKFLOW.to_string(),
            to,
            actor,
            reason: None,
            changes: EngagementChanges::default(),
        }
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Bundle field changes.
    pub fn with_changes(mut self, changes: EngagementChanges) -> Self {
        self.changes = changes;
        self
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on each detached on-enter dispatch.
    pub dispatch_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Applies validated stage transitions. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleEngine {
    registry: Arc<StageRegistry>,
    store: Arc<dyn EngagementStore>,
    activity: Arc<dyn ActivityLog>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("workflow", &self.registry.workflow())
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    /// Wire an engine from its collaborators.
    pub fn new(
        registry: Arc<StageRegistry>,
        store: Arc<dyn EngagementStore>,
        activity: Arc<dyn ActivityLog>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            activity,
            notifier,
            clock,
            config,
        }
    }

    /// The stage registry.
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The engagement store.
    pub fn store(&self) -> &Arc<dyn EngagementStore> {
        &self.store
    }

    /// The clock the engine reads "now" from.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Apply a stage transition.
    pub async fn transition(&self, request: TransitionRequest) -> Result<Engagement, LifecycleError> {
        self.resolve_workflow(&request.workflow)?;
        let engagement = self.load(request.engagement_id).await?;
        let from = engagement.stage;
        let to = request.to;

        let ctx = TransitionContext {
            actor: request.actor,
            reason: request.reason.clone(),
            now: self.clock.now(),
            has_field_changes: !request.changes.is_empty(),
        };

        let approved = match self.check(&engagement, to, &request.changes, &ctx) {
            Ok(approved) => approved,
            Err(denial) => {
                self.on_denied(&engagement, &ctx, &denial).await;
                return Err(denial.into());
            }
        };

        let updated = self
            .store
            .compare_and_set_stage(
                engagement.id,
                &engagement.guard(),
                to,
                &request.changes,
                ctx.now,
            )
            .await?
            .ok_or(LifecycleError::Conflict {
                id: engagement.id,
                expected: from,
            })?;

        metrics::counter!("auditflow_transitions_total", "to" => to.as_str()).increment(1);
        tracing::info!(
            engagement_id = %updated.id,
            from = %from,
            to = %to,
            direction = %approved.direction,
            actor = %ctx.actor,
            "stage transition applied"
        );

        self.dispatch_on_enter(&updated, &approved, ctx.actor);
        self.record_activity(ActivityEntry::stage_change(
            updated.id,
            from,
            to,
            ctx.actor,
            ctx.reason,
            ctx.now,
        ))
        .await;

        Ok(updated)
    }

    /// Pre-check a transition without mutating anything.
    pub async fn validate(
        &self,
        id: EngagementId,
        to: Stage,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<ApprovedTransition, LifecycleError> {
        let engagement = self.load(id).await?;
        let ctx = TransitionContext {
            actor,
            reason,
            now: self.clock.now(),
            has_field_changes: false,
        };
        Ok(validate_transition(
            &self.registry,
            &engagement,
            engagement.stage,
            to,
            &ctx,
        )?)
    }

    /// Every stage `actor` could move the engagement to right now.
    pub async fn allowed_targets(
        &self,
        id: EngagementId,
        actor: Actor,
    ) -> Result<Vec<Stage>, LifecycleError> {
        let engagement = self.load(id).await?;
        let ctx = TransitionContext::new(actor, self.clock.now());
        Ok(allowed_targets(&self.registry, &engagement, &ctx))
    }

    /// Change business fields without changing the stage.
    ///
    /// Refused with `STAGE_READONLY` while the engagement is in a readonly
    /// stage.
    pub async fn update_fields(
        &self,
        id: EngagementId,
        changes: EngagementChanges,
        actor: Actor,
    ) -> Result<Engagement, LifecycleError> {
        let engagement = self.load(id).await?;
        let stage = engagement.stage;

        if self.registry.rules_for(stage).readonly {
            tracing::warn!(
                engagement_id = %id,
                stage = %stage,
                actor = %actor,
                "field update refused in read-only stage"
            );
            return Err(TransitionDenial::new(ReasonCode::StageReadonly, stage, stage).into());
        }
        if changes.is_empty() {
            return Ok(engagement);
        }

        let now = self.clock.now();
        let updated = self
            .store
            .update_fields(id, stage, &changes, now)
            .await?
            .ok_or(LifecycleError::Conflict { id, expected: stage })?;

        tracing::debug!(engagement_id = %id, stage = %stage, "engagement fields updated");
        self.record_activity(ActivityEntry::field_update(id, stage, actor, now))
            .await;
        Ok(updated)
    }

    /// Validate against the record as stored and, when fields ride along,
    /// against the record as it would be saved. Both must pass.
    fn check(
        &self,
        engagement: &Engagement,
        to: Stage,
        changes: &EngagementChanges,
        ctx: &TransitionContext,
    ) -> Result<ApprovedTransition, TransitionDenial> {
        let from = engagement.stage;
        let approved = validate_transition(&self.registry, engagement, from, to, ctx)?;
        if changes.is_empty() {
            return Ok(approved);
        }

        let mut next = engagement.clone();
        next.apply(changes, ctx.now);
        validate_transition(&self.registry, &next, from, to, ctx)
    }

    fn resolve_workflow(&self, workflow: &str) -> Result<(), LifecycleError> {
        if workflow == self.registry.workflow() {
            Ok(())
        } else {
            Err(LifecycleError::UnknownWorkflow(workflow.to_string()))
        }
    }

    async fn load(&self, id: EngagementId) -> Result<Engagement, LifecycleError> {
        self.store
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    async fn on_denied(
        &self,
        engagement: &Engagement,
        ctx: &TransitionContext,
        denial: &TransitionDenial,
    ) {
        metrics::counter!(
            "auditflow_transition_denials_total",
            "code" => denial.code.as_str()
        )
        .increment(1);

        if denial.code != ReasonCode::InsufficientPermissions {
            tracing::debug!(
                engagement_id = %engagement.id,
                from = %denial.from,
                to = %denial.to,
                code = %denial.code,
                "stage transition denied"
            );
            return;
        }

        tracing::warn!(
            engagement_id = %engagement.id,
            from = %denial.from,
            to = %denial.to,
            actor = %ctx.actor,
            "stage transition denied: insufficient permissions"
        );
        self.record_activity(ActivityEntry::permission_denied(
            engagement.id,
            denial.from,
            denial.to,
            ctx.actor,
            ctx.reason.clone(),
            ctx.now,
        ))
        .await;
    }

    fn dispatch_on_enter(&self, engagement: &Engagement, approved: &ApprovedTransition, actor: Actor) {
        for action in approved.on_enter.iter().copied() {
            let notifier = Arc::clone(&self.notifier);
            let timeout = self.config.dispatch_timeout;
            let context = NotificationContext {
                engagement_id: engagement.id,
                stage: approved.to,
                action,
                triggered_by: actor,
                at: engagement.updated_at,
            };

            tokio::spawn(async move {
                let template = action.template_key();
                match tokio::time::timeout(timeout, notifier.queue_email(template, &context)).await {
                    Ok(Ok(())) => {
                        tracing::debug!(
                            engagement_id = %context.engagement_id,
                            action = %action,
                            "on-enter action dispatched"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            engagement_id = %context.engagement_id,
                            action = %action,
                            error = %e,
                            "on-enter action failed"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            engagement_id = %context.engagement_id,
                            action = %action,
                            timeout_ms = timeout.as_millis() as u64,
                            "on-enter action timed out"
                        );
                    }
                }
            });
        }
    }

    async fn record_activity(&self, entry: ActivityEntry) {
        let engagement_id = entry.engagement_id;
        let action = entry.action;
        if let Err(e) = self.activity.record(entry).await {
            tracing::error!(
                engagement_id = %engagement_id,
                action = %action,
                error = %e,
                "failed to write activity log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::notify::LogDispatcher;
    use auditflow_core::{ActorId, FixedClock, Timestamp};
    use auditflow_state::{Progress, Role};

    fn now() -> Timestamp {
        Timestamp::parse("2026-05-04T08:00:00Z").unwrap()
    }

    fn engine(store: &MemoryStore) -> LifecycleEngine {
        LifecycleEngine::new(
            Arc::new(StageRegistry::standard()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LogDispatcher),
            Arc::new(FixedClock::new(now())),
            EngineConfig::default(),
        )
    }

    async fn seed(store: &MemoryStore, stage: Stage) -> Engagement {
        let mut e = Engagement::new(EngagementId::new(), None, now().offset_secs(-86_400));
        e.stage = stage;
        store.create(&e).await.unwrap();
        e
    }

    fn partner() -> Actor {
        Actor::user(ActorId::new(), Role::Partner)
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let store = MemoryStore::new();
        let e = seed(&store, Stage::TeamExecution).await;
        let mut request = TransitionRequest::new(e.id, Stage::PartnerReview, partner());
        request.workflow = "invoice_lifecycle".into();
        let err = engine(&store).transition(request).await.unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::UnknownWorkflow));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_missing_engagement() {
        let store = MemoryStore::new();
        let request = TransitionRequest::new(EngagementId::new(), Stage::Commencement, partner());
        let err = engine(&store).transition(request).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_transition_persists_and_logs_activity() {
        let store = MemoryStore::new();
        let e = seed(&store, Stage::TeamExecution).await;
        let request = TransitionRequest::new(e.id, Stage::PartnerReview, partner())
            .with_reason("fieldwork complete");
        let updated = engine(&store).transition(request).await.unwrap();
        assert_eq!(updated.stage, Stage::PartnerReview);
        assert_eq!(updated.updated_at, now());

        let log = store.history(e.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].from, Stage::TeamExecution);
        assert_eq!(log[0].to, Some(Stage::PartnerReview));
        assert_eq!(log[0].reason.as_deref(), Some("fieldwork complete"));
    }

    #[tokio::test]
    async fn test_denial_leaves_engagement_untouched() {
        let store = MemoryStore::new();
        let mut e = seed(&store, Stage::PartnerReview).await;
        e.progress = Progress::from_percent(60).unwrap();
        store
            .update_fields(
                e.id,
                Stage::PartnerReview,
                &EngagementChanges {
                    progress: Some(e.progress),
                    ..EngagementChanges::default()
                },
                e.updated_at,
            )
            .await
            .unwrap();

        let request = TransitionRequest::new(e.id, Stage::Finalization, partner());
        let err = engine(&store).transition(request).await.unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::AdvanceGateNotMet));
        assert_eq!(store.get(e.id).await.unwrap().unwrap().stage, Stage::PartnerReview);
        assert!(store.history(e.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_does_not_mutate() {
        let store = MemoryStore::new();
        let e = seed(&store, Stage::Finalization).await;
        let engine = engine(&store);
        let approved = engine
            .validate(e.id, Stage::CloseOut, partner(), None)
            .await
            .unwrap();
        assert_eq!(approved.to, Stage::CloseOut);
        assert_eq!(store.get(e.id).await.unwrap().unwrap().stage, Stage::Finalization);
    }

    #[tokio::test]
    async fn test_update_fields_outside_readonly_stage() {
        let store = MemoryStore::new();
        let e = seed(&store, Stage::TeamExecution).await;
        let changes = EngagementChanges {
            engagement_letter_accepted: Some(true),
            ..EngagementChanges::default()
        };
        let updated = engine(&store)
            .update_fields(e.id, changes, partner())
            .await
            .unwrap();
        assert!(updated.engagement_letter_accepted);
        assert_eq!(updated.stage, Stage::TeamExecution);
    }

    #[test]
    fn test_error_codes() {
        let conflict = LifecycleError::Conflict {
            id: EngagementId::new(),
            expected: Stage::Commencement,
        };
        assert_eq!(conflict.http_status(), 409);
        let store = LifecycleError::from(StoreError::Corrupt {
            id: uuid::Uuid::nil(),
            reason: "bad stage".into(),
        });
        assert_eq!(store.code(), None);
        assert_eq!(store.http_status(), 500);
        let missing = LifecycleError::from(StoreError::NotFound(EngagementId::new()));
        assert_eq!(missing.code(), Some(ReasonCode::EntityNotFound));
    }
}
