//! # Transition Validator
//!
//! The single decision point for "may this engagement move from stage A to
//! stage B right now, by this actor". Pure: no I/O, no hidden state, and time
//! only enters through [`TransitionContext::now`].
//!
//! ## Check order
//!
//! Checks run fail-fast, so a request is always denied with the first
//! applicable reason:
//!
//! 1. identity (`NO_OP`)
//! 2. whitelist (`INVALID_TRANSITION`)
//! 3. readonly source (`STAGE_READONLY`)
//! 4. authority (`INSUFFICIENT_PERMISSIONS`)
//! 5. close-out gate (`CLOSEOUT_GATE_NOT_MET`)
//! 6. backward date gate (`BACKWARD_TRANSITION_DATE_PASSED`)
//! 7. advance gate (`ADVANCE_GATE_NOT_MET`)
//! 8. commencement date (`COMMENCEMENT_DATE_IN_FUTURE`)
//! 9. readonly destination with field changes (`STAGE_READONLY`)

use auditflow_core::{EngagementId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::{Actor, TransitionMode};
use crate::engagement::Engagement;
use crate::stage::{Direction, OnEnterAction, Stage, StageRegistry};

// ─── Reason Codes ────────────────────────────────────────────────────

/// Machine-readable reason attached to every denied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Target equals the current stage.
    NoOp,
    /// Target is not whitelisted from the current stage.
    InvalidTransition,
    /// The stage is frozen.
    StageReadonly,
    /// The actor lacks the role the move requires.
    InsufficientPermissions,
    /// Close-out sign-off condition not met.
    CloseoutGateNotMet,
    /// Sign-off condition for entering a gated stage not met.
    AdvanceGateNotMet,
    /// Backward move into `info_gathering` after the commencement date.
    BackwardTransitionDatePassed,
    /// Manual entry into `commencement` before its scheduled date.
    CommencementDateInFuture,
    /// The engagement does not exist.
    EntityNotFound,
    /// The stage changed concurrently.
    StageConflict,
    /// The workflow name is not registered.
    UnknownWorkflow,
}

impl ReasonCode {
    /// Wire identifier (`NO_OP`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOp => "NO_OP",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::StageReadonly => "STAGE_READONLY",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::CloseoutGateNotMet => "CLOSEOUT_GATE_NOT_MET",
            Self::AdvanceGateNotMet => "ADVANCE_GATE_NOT_MET",
            Self::BackwardTransitionDatePassed => "BACKWARD_TRANSITION_DATE_PASSED",
            Self::CommencementDateInFuture => "COMMENCEMENT_DATE_IN_FUTURE",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::StageConflict => "STAGE_CONFLICT",
            Self::UnknownWorkflow => "UNKNOWN_WORKFLOW",
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::StageReadonly | Self::InsufficientPermissions => 403,
            Self::EntityNotFound => 404,
            Self::StageConflict => 409,
            Self::NoOp
            | Self::InvalidTransition
            | Self::CloseoutGateNotMet
            | Self::AdvanceGateNotMet
            | Self::BackwardTransitionDatePassed
            | Self::CommencementDateInFuture
            | Self::UnknownWorkflow => 400,
        }
    }

    /// Human-readable message for a denied `from → to` request.
    pub fn message(&self, from: Stage, to: Stage) -> String {
        match self {
            Self::NoOp => format!("engagement is already in {}", from.label()),
            Self::InvalidTransition => {
                format!("cannot move from {} to {}", from.label(), to.label())
            }
            Self::StageReadonly => {
                "the engagement is in a read-only stage; no further changes are permitted"
                    .to_string()
            }
            Self::InsufficientPermissions => {
                format!("not permitted to move the engagement to {}", to.label())
            }
            Self::CloseoutGateNotMet => "the engagement letter must be accepted before \
                closing out an engagement with recorded progress"
                .to_string(),
            Self::AdvanceGateNotMet => format!(
                "the engagement letter must be accepted before moving to {}",
                to.label()
            ),
            Self::BackwardTransitionDatePassed => format!(
                "cannot return to {} once the commencement date has passed",
                to.label()
            ),
            Self::CommencementDateInFuture => format!(
                "cannot move to {} before the commencement date",
                to.label()
            ),
            Self::EntityNotFound => "engagement not found".to_string(),
            Self::StageConflict => {
                format!("engagement is no longer in {}", from.label())
            }
            Self::UnknownWorkflow => "unknown workflow".to_string(),
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A denied transition.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TransitionDenial {
    /// The first failing check.
    pub code: ReasonCode,
    /// Current stage.
    pub from: Stage,
    /// Requested stage.
    pub to: Stage,
    /// Human-readable explanation.
    pub message: String,
}

impl TransitionDenial {
    /// Denial with the standard message for `code`.
    pub fn new(code: ReasonCode, from: Stage, to: Stage) -> Self {
        Self {
            code,
            from,
            to,
            message: code.message(from, to),
        }
    }
}

// ─── Context and Outcome ─────────────────────────────────────────────

/// Everything the validator needs besides the registry and the engagement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionContext {
    /// Who is asking.
    pub actor: Actor,
    /// Free-text reason, carried to the activity log.
    pub reason: Option<String>,
    /// The current instant.
    pub now: Timestamp,
    /// Whether the request also changes business fields.
    pub has_field_changes: bool,
}

impl TransitionContext {
    /// Context for a bare stage change.
    pub fn new(actor: Actor, now: Timestamp) -> Self {
        Self {
            actor,
            reason: None,
            now,
            has_field_changes: false,
        }
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Mark the request as bundling field changes.
    pub fn with_field_changes(mut self, has_field_changes: bool) -> Self {
        self.has_field_changes = has_field_changes;
        self
    }

    /// Mode derived from the actor.
    pub fn mode(&self) -> TransitionMode {
        self.actor.mode()
    }
}

/// An approved transition, ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovedTransition {
    /// Current stage.
    pub from: Stage,
    /// Destination stage.
    pub to: Stage,
    /// Direction by stage order.
    pub direction: Direction,
    /// Manual or auto.
    pub mode: TransitionMode,
    /// Side effects to dispatch once the stage is persisted.
    pub on_enter: Vec<OnEnterAction>,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The stage changed.
    Approved,
    /// The request was refused.
    Denied(ReasonCode),
}

/// Record of a transition attempt, approved or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAttempt {
    /// Subject engagement.
    pub engagement_id: EngagementId,
    /// Stage at the time of the attempt.
    pub from: Stage,
    /// Requested stage.
    pub to: Stage,
    /// Who asked.
    pub actor: Actor,
    /// Free-text reason.
    pub reason: Option<String>,
    /// Manual or auto.
    pub mode: TransitionMode,
    /// When the attempt was evaluated.
    pub at: Timestamp,
    /// What happened.
    pub outcome: AttemptOutcome,
}

impl TransitionAttempt {
    /// Build the record from a context and a validation result.
    pub fn record(
        engagement_id: EngagementId,
        from: Stage,
        to: Stage,
        ctx: &TransitionContext,
        result: &Result<ApprovedTransition, TransitionDenial>,
    ) -> Self {
        let outcome = match result {
            Ok(_) => AttemptOutcome::Approved,
            Err(denial) => AttemptOutcome::Denied(denial.code),
        };
        Self {
            engagement_id,
            from,
            to,
            actor: ctx.actor,
            reason: ctx.reason.clone(),
            mode: ctx.mode(),
            at: ctx.now,
            outcome,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────

/// Decide whether `engagement` may move `from → to`.
///
/// `from` is passed separately from `engagement.stage` so callers can
/// validate against the stage they expect to compare-and-swap on.
pub fn validate_transition(
    registry: &StageRegistry,
    engagement: &Engagement,
    from: Stage,
    to: Stage,
    ctx: &TransitionContext,
) -> Result<ApprovedTransition, TransitionDenial> {
    let deny = |code| Err(TransitionDenial::new(code, from, to));

    if from == to {
        return deny(ReasonCode::NoOp);
    }

    let source = registry.definition(from);
    if !source.transitions.contains(to) {
        return deny(ReasonCode::InvalidTransition);
    }
    if source.rules.readonly {
        return deny(ReasonCode::StageReadonly);
    }

    let direction = registry.direction(from, to);
    let mode = ctx.mode();
    let target = registry.rules_for(to);

    // Authority.
    let auto = source.rules.auto_transition.as_ref();
    if ctx.actor.is_system() && auto.map(|a| a.to) != Some(to) {
        return deny(ReasonCode::InsufficientPermissions);
    }
    let advance = match direction {
        Direction::Forward => target.restrictions.advance.as_ref(),
        Direction::Backward | Direction::Same => None,
    };
    if let Some(role) = advance.and_then(|gate| gate.role) {
        if !ctx.actor.has_authority(role, mode) {
            return deny(ReasonCode::InsufficientPermissions);
        }
    }

    let gate_unmet = advance
        .and_then(|gate| gate.requires)
        .is_some_and(|condition| !condition.holds(engagement));

    if gate_unmet && to == Stage::CloseOut {
        return deny(ReasonCode::CloseoutGateNotMet);
    }

    if direction == Direction::Backward
        && target
            .restrictions
            .reentry
            .is_some_and(|restriction| restriction.blocks(engagement, ctx.now))
    {
        return deny(ReasonCode::BackwardTransitionDatePassed);
    }

    if gate_unmet {
        return deny(ReasonCode::AdvanceGateNotMet);
    }

    match mode {
        TransitionMode::Auto => {
            if !auto.is_some_and(|a| a.condition.holds(engagement, ctx.now)) {
                return deny(ReasonCode::CommencementDateInFuture);
            }
        }
        TransitionMode::Manual => {
            if target
                .restrictions
                .manual_set
                .is_some_and(|condition| condition.is_pending(engagement, ctx.now))
            {
                return deny(ReasonCode::CommencementDateInFuture);
            }
        }
    }

    if target.readonly && ctx.has_field_changes {
        return deny(ReasonCode::StageReadonly);
    }

    Ok(ApprovedTransition {
        from,
        to,
        direction,
        mode,
        on_enter: target.on_enter.clone(),
    })
}

/// Every stage the actor could move the engagement to right now.
pub fn allowed_targets(
    registry: &StageRegistry,
    engagement: &Engagement,
    ctx: &TransitionContext,
) -> Vec<Stage> {
    registry
        .ordered_stages()
        .iter()
        .copied()
        .filter(|to| validate_transition(registry, engagement, engagement.stage, *to, ctx).is_ok())
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::engagement::Progress;
    use auditflow_core::ActorId;
    use proptest::prelude::*;

    const DAY: i64 = 86_400;

    fn now() -> Timestamp {
        Timestamp::parse("2026-03-10T09:00:00Z").unwrap()
    }

    fn engagement(stage: Stage) -> Engagement {
        let mut e = Engagement::new(EngagementId::new(), None, now().offset_secs(-30 * DAY));
        e.stage = stage;
        e
    }

    fn ctx(role: Role) -> TransitionContext {
        TransitionContext::new(Actor::user(ActorId::new(), role), now())
    }

    fn check(e: &Engagement, to: Stage, ctx: &TransitionContext) -> Result<ApprovedTransition, TransitionDenial> {
        validate_transition(&StageRegistry::standard(), e, e.stage, to, ctx)
    }

    fn code(e: &Engagement, to: Stage, ctx: &TransitionContext) -> ReasonCode {
        check(e, to, ctx).unwrap_err().code
    }

    // ── Scenarios ──────────────────────────────────────────────────

    #[test]
    fn test_backward_into_info_gathering_after_commencement_date() {
        let mut e = engagement(Stage::Commencement);
        e.commencement_date = Some(now().offset_secs(-2 * DAY));
        assert_eq!(
            code(&e, Stage::InfoGathering, &ctx(Role::Manager)),
            ReasonCode::BackwardTransitionDatePassed
        );
    }

    #[test]
    fn test_backward_into_info_gathering_before_commencement_date() {
        let mut e = engagement(Stage::TeamExecution);
        e.commencement_date = Some(now().offset_secs(5 * DAY));
        let approved = check(&e, Stage::InfoGathering, &ctx(Role::Manager)).unwrap();
        assert_eq!(approved.direction, Direction::Backward);
        assert!(approved.on_enter.is_empty());
    }

    #[test]
    fn test_close_out_with_zero_progress() {
        let e = engagement(Stage::Finalization);
        let approved = check(&e, Stage::CloseOut, &ctx(Role::Partner)).unwrap();
        assert_eq!(approved.on_enter, vec![OnEnterAction::NotifyCloseOut]);
    }

    #[test]
    fn test_close_out_gate_not_met() {
        let mut e = engagement(Stage::Finalization);
        e.progress = Progress::from_percent(45).unwrap();
        assert_eq!(
            code(&e, Stage::CloseOut, &ctx(Role::Partner)),
            ReasonCode::CloseoutGateNotMet
        );
        e.engagement_letter_accepted = true;
        assert!(check(&e, Stage::CloseOut, &ctx(Role::Partner)).is_ok());
    }

    #[test]
    fn test_manager_cannot_close_out() {
        let mut e = engagement(Stage::Finalization);
        assert_eq!(
            code(&e, Stage::CloseOut, &ctx(Role::Manager)),
            ReasonCode::InsufficientPermissions
        );
        // Regardless of gate state.
        e.progress = Progress::from_percent(45).unwrap();
        assert_eq!(
            code(&e, Stage::CloseOut, &ctx(Role::Manager)),
            ReasonCode::InsufficientPermissions
        );
    }

    // ── Individual checks ──────────────────────────────────────────

    #[test]
    fn test_same_stage_is_no_op() {
        let e = engagement(Stage::TeamExecution);
        assert_eq!(code(&e, Stage::TeamExecution, &ctx(Role::Partner)), ReasonCode::NoOp);
    }

    #[test]
    fn test_skipping_stages_is_invalid() {
        let e = engagement(Stage::Commencement);
        assert_eq!(
            code(&e, Stage::Finalization, &ctx(Role::Partner)),
            ReasonCode::InvalidTransition
        );
    }

    #[test]
    fn test_finalization_requires_partner() {
        let e = engagement(Stage::PartnerReview);
        assert_eq!(
            code(&e, Stage::Finalization, &ctx(Role::Clerk)),
            ReasonCode::InsufficientPermissions
        );
        assert!(check(&e, Stage::Finalization, &ctx(Role::Partner)).is_ok());
    }

    #[test]
    fn test_finalization_advance_gate() {
        let mut e = engagement(Stage::PartnerReview);
        e.progress = Progress::from_percent(80).unwrap();
        assert_eq!(
            code(&e, Stage::Finalization, &ctx(Role::Partner)),
            ReasonCode::AdvanceGateNotMet
        );
    }

    #[test]
    fn test_backward_out_of_finalization_needs_no_partner() {
        let mut e = engagement(Stage::Finalization);
        e.progress = Progress::from_percent(80).unwrap();
        assert!(check(&e, Stage::TeamExecution, &ctx(Role::Clerk)).is_ok());
    }

    #[test]
    fn test_manual_commencement_before_date() {
        let mut e = engagement(Stage::InfoGathering);
        e.commencement_date = Some(now().offset_secs(DAY));
        assert_eq!(
            code(&e, Stage::Commencement, &ctx(Role::Partner)),
            ReasonCode::CommencementDateInFuture
        );
    }

    #[test]
    fn test_manual_commencement_on_or_after_date() {
        let mut e = engagement(Stage::InfoGathering);
        e.commencement_date = Some(now());
        let approved = check(&e, Stage::Commencement, &ctx(Role::Clerk)).unwrap();
        assert_eq!(approved.on_enter, vec![OnEnterAction::SendEngagementLetter]);
        assert_eq!(approved.mode, TransitionMode::Manual);
    }

    #[test]
    fn test_commencement_date_boundary_blocks_reentry() {
        let mut e = engagement(Stage::Commencement);
        e.commencement_date = Some(now());
        assert_eq!(
            code(&e, Stage::InfoGathering, &ctx(Role::Partner)),
            ReasonCode::BackwardTransitionDatePassed
        );
    }

    #[test]
    fn test_unset_commencement_date_allows_reentry() {
        let e = engagement(Stage::Commencement);
        assert!(check(&e, Stage::InfoGathering, &ctx(Role::Clerk)).is_ok());
    }

    #[test]
    fn test_system_auto_transition() {
        let mut e = engagement(Stage::InfoGathering);
        let system = TransitionContext::new(Actor::System, now());
        assert_eq!(
            code(&e, Stage::Commencement, &system),
            ReasonCode::CommencementDateInFuture
        );
        e.commencement_date = Some(now().offset_secs(-DAY));
        let approved = check(&e, Stage::Commencement, &system).unwrap();
        assert_eq!(approved.mode, TransitionMode::Auto);
    }

    #[test]
    fn test_system_limited_to_declared_auto_transition() {
        let e = engagement(Stage::Finalization);
        let system = TransitionContext::new(Actor::System, now());
        assert_eq!(
            code(&e, Stage::CloseOut, &system),
            ReasonCode::InsufficientPermissions
        );
        let e = engagement(Stage::Commencement);
        assert_eq!(
            code(&e, Stage::TeamExecution, &system),
            ReasonCode::InsufficientPermissions
        );
    }

    #[test]
    fn test_close_out_with_field_changes_is_readonly() {
        let e = engagement(Stage::Finalization);
        let ctx = ctx(Role::Partner).with_field_changes(true);
        assert_eq!(code(&e, Stage::CloseOut, &ctx), ReasonCode::StageReadonly);
    }

    #[test]
    fn test_allowed_targets() {
        let mut e = engagement(Stage::Finalization);
        e.progress = Progress::from_percent(10).unwrap();
        e.commencement_date = Some(now().offset_secs(-DAY));
        let targets = allowed_targets(&StageRegistry::standard(), &e, &ctx(Role::Partner));
        assert_eq!(
            targets,
            vec![Stage::Commencement, Stage::TeamExecution, Stage::PartnerReview]
        );
    }

    #[test]
    fn test_attempt_record() {
        let e = engagement(Stage::Finalization);
        let ctx = ctx(Role::Manager).with_reason("wrap up");
        let result = check(&e, Stage::CloseOut, &ctx);
        let attempt = TransitionAttempt::record(e.id, e.stage, Stage::CloseOut, &ctx, &result);
        assert_eq!(
            attempt.outcome,
            AttemptOutcome::Denied(ReasonCode::InsufficientPermissions)
        );
        assert_eq!(attempt.reason.as_deref(), Some("wrap up"));
        assert_eq!(attempt.mode, TransitionMode::Manual);
    }

    #[test]
    fn test_reason_code_wire_format() {
        let json = serde_json::to_string(&ReasonCode::CloseoutGateNotMet).unwrap();
        assert_eq!(json, "\"CLOSEOUT_GATE_NOT_MET\"");
        assert_eq!(ReasonCode::StageConflict.http_status(), 409);
        assert_eq!(ReasonCode::InsufficientPermissions.http_status(), 403);
        assert_eq!(ReasonCode::EntityNotFound.http_status(), 404);
        assert_eq!(ReasonCode::NoOp.http_status(), 400);
    }

    #[test]
    fn test_denial_display() {
        let denial = TransitionDenial::new(ReasonCode::NoOp, Stage::CloseOut, Stage::CloseOut);
        assert_eq!(denial.to_string(), "NO_OP: engagement is already in Close Out");
    }

    // ── Properties ─────────────────────────────────────────────────

    fn any_stage() -> impl Strategy<Value = Stage> {
        (0usize..6).prop_map(|i| Stage::ALL[i])
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Partner),
            Just(Role::Manager),
            Just(Role::Clerk),
            Just(Role::ClientAdmin),
            Just(Role::ClientUser),
        ]
    }

    fn any_actor() -> impl Strategy<Value = Actor> {
        prop_oneof![
            any_role().prop_map(|role| Actor::user(ActorId::new(), role)),
            Just(Actor::System),
        ]
    }

    prop_compose! {
        fn any_engagement()(
            stage in any_stage(),
            date_offset in proptest::option::of(-400i64..400),
            progress in 0u8..=100,
            accepted in any::<bool>(),
        ) -> Engagement {
            let mut e = engagement(stage);
            e.commencement_date = date_offset.map(|days| now().offset_secs(days * DAY));
            e.progress = Progress::from_percent(progress).unwrap();
            e.engagement_letter_accepted = accepted;
            e
        }
    }

    proptest! {
        #[test]
        fn prop_close_out_denies_every_target(
            e in any_engagement(),
            to in any_stage(),
            actor in any_actor(),
            changes in any::<bool>(),
        ) {
            let mut e = e;
            e.stage = Stage::CloseOut;
            let ctx = TransitionContext::new(actor, now()).with_field_changes(changes);
            prop_assert!(check(&e, to, &ctx).is_err());
        }

        #[test]
        fn prop_partner_forward_step_denied_only_by_gates(
            e in any_engagement(),
        ) {
            prop_assume!(e.stage != Stage::CloseOut);
            let next = Stage::ALL[e.stage.index() + 1];
            if let Err(denial) = check(&e, next, &ctx(Role::Partner)) {
                prop_assert!(
                    matches!(
                        denial.code,
                        ReasonCode::AdvanceGateNotMet
                            | ReasonCode::CloseoutGateNotMet
                            | ReasonCode::CommencementDateInFuture
                    ),
                    "unexpected denial {:?}", denial.code
                );
            }
        }

        #[test]
        fn prop_backward_date_gate_only_guards_info_gathering(
            e in any_engagement(),
            to in any_stage(),
            role in any_role(),
        ) {
            prop_assume!(to != Stage::InfoGathering);
            if let Err(denial) = check(&e, to, &ctx(role)) {
                prop_assert_ne!(denial.code, ReasonCode::BackwardTransitionDatePassed);
            }
        }

        #[test]
        fn prop_validation_is_deterministic(
            e in any_engagement(),
            to in any_stage(),
            actor in any_actor(),
        ) {
            let ctx = TransitionContext::new(actor, now());
            let before = e.clone();
            let first = check(&e, to, &ctx);
            let second = check(&e, to, &ctx);
            prop_assert_eq!(first, second);
            prop_assert_eq!(e, before);
        }
    }
}
