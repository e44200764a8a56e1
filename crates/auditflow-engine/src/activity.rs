//! Activity log entries.
//!
//! One entry per applied stage change, denied-for-permissions attempt, and
//! plain field update. Entries are immutable once written.

use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{Actor, Stage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What an activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    /// The stage changed.
    StageChange,
    /// A transition was refused for lack of authority.
    PermissionDenied,
    /// Business fields changed without a stage change.
    FieldUpdate,
}

impl ActivityAction {
    /// Stored identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageChange => "stage_change",
            Self::PermissionDenied => "permission_denied",
            Self::FieldUpdate => "field_update",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an activity action identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown activity action: {0:?}")]
pub struct ActionParseError(pub String);

impl std::str::FromStr for ActivityAction {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage_change" => Ok(Self::StageChange),
            "permission_denied" => Ok(Self::PermissionDenied),
            "field_update" => Ok(Self::FieldUpdate),
            other => Err(ActionParseError(other.to_string())),
        }
    }
}

/// One activity log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Subject engagement.
    pub engagement_id: EngagementId,
    /// What happened.
    pub action: ActivityAction,
    /// Stage before the action.
    pub from: Stage,
    /// Stage after (or requested by) the action; `None` for field updates.
    pub to: Option<Stage>,
    /// Who acted.
    pub actor: Actor,
    /// Free-text reason.
    pub reason: Option<String>,
    /// When it happened.
    pub at: Timestamp,
}

impl ActivityEntry {
    fn new(
        engagement_id: EngagementId,
        action: ActivityAction,
        from: Stage,
        to: Option<Stage>,
        actor: Actor,
        reason: Option<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            engagement_id,
            action,
            from,
            to,
            actor,
            reason,
            at,
        }
    }

    /// An applied stage change.
    pub fn stage_change(
        engagement_id: EngagementId,
        from: Stage,
        to: Stage,
        actor: Actor,
        reason: Option<String>,
        at: Timestamp,
    ) -> Self {
        Self::new(
            engagement_id,
            ActivityAction::StageChange,
            from,
            Some(to),
            actor,
            reason,
            at,
        )
    }

    /// A transition refused with `INSUFFICIENT_PERMISSIONS`.
    pub fn permission_denied(
        engagement_id: EngagementId,
        from: Stage,
        attempted: Stage,
        actor: Actor,
        reason: Option<String>,
        at: Timestamp,
    ) -> Self {
        Self::new(
            engagement_id,
            ActivityAction::PermissionDenied,
            from,
            Some(attempted),
            actor,
            reason,
            at,
        )
    }

    /// A field update within `stage`.
    pub fn field_update(
        engagement_id: EngagementId,
        stage: Stage,
        actor: Actor,
        at: Timestamp,
    ) -> Self {
        Self::new(
            engagement_id,
            ActivityAction::FieldUpdate,
            stage,
            None,
            actor,
            None,
            at,
        )
    }
}
