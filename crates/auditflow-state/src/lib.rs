//! # auditflow-state — Engagement Workflow State
//!
//! The pure half of the engagement lifecycle. Nothing in this crate performs
//! I/O or reads the wall clock; the lifecycle engine in `auditflow-engine`
//! supplies "now" and persists the outcome.
//!
//! ## Stages
//!
//! ```text
//! info_gathering ──▶ commencement ──▶ team_execution ──▶ partner_review ──▶ finalization ──▶ close_out
//!       ▲  (auto when the              │                     │                   │            (terminal,
//!       │   commencement date          │                     │                   │             readonly)
//!       │   is reached)                ▼                     ▼                   ▼
//!       └──────────────────── backward moves (date-gated into info_gathering) ───┘
//! ```
//!
//! ## Modules
//!
//! - **Stage** (`stage.rs`): the one stage ordering, display metadata, typed
//!   per-stage rules, and the `StageRegistry` loaded from code or YAML.
//!
//! - **Actor** (`actor.rs`): closed `Role` enum, the `System` pseudo-actor,
//!   and the capability check.
//!
//! - **Engagement** (`engagement.rs`): the workflow subject and its field
//!   changes.
//!
//! - **Validator** (`validator.rs`): the single decision point for "may this
//!   stage change happen now", returning a typed denial with one reason code.
//!
//! ## Design
//!
//! Stages are an enum with registry-validated transitions rather than
//! typestate types. The rules are data (an operator can override them with a
//! YAML file), so the checks have to happen at runtime; the registry is
//! validated once at load and is immutable afterwards.

pub mod actor;
pub mod engagement;
pub mod stage;
pub mod validator;

pub use actor::{Actor, Role, RoleParseError, TransitionMode};
pub use engagement::{
    Engagement, EngagementChanges, EngagementStatus, Progress, ProgressError, RepeatInterval,
    RepeatIntervalParseError, StatusParseError, TransitionGuard,
};
pub use stage::{
    AdvanceGate, AllowedTransitions, AutoTransition, DateCondition, Direction, GateCondition,
    OnEnterAction, ReentryRestriction, RegistryError, Stage, StageDefinition, StageParseError,
    StageRegistry, StageRestrictions, StageRules, ENGAGEMENT_WORKFLOW,
};
pub use validator::{
    allowed_targets, validate_transition, ApprovedTransition, AttemptOutcome, ReasonCode,
    TransitionAttempt, TransitionContext, TransitionDenial,
};
