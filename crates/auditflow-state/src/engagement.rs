//! # Engagement Record
//!
//! The workflow subject. `stage` changes only through the lifecycle engine;
//! the other business fields change through [`EngagementChanges`], which the
//! engine refuses to apply while the engagement sits in a readonly stage.

use auditflow_core::{EngagementId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::Stage;

/// Administrative status of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    /// Created but not yet live.
    Pending,
    /// Live; eligible for auto-transitions.
    Active,
}

impl EngagementStatus {
    /// Stored identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
        }
    }
}

impl std::fmt::Display for EngagementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an engagement status identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown engagement status: {0:?}")]
pub struct StatusParseError(pub String);

impl std::str::FromStr for EngagementStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// How often an engagement is recreated. Not used by the stage machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatInterval {
    /// Recreated every year.
    Yearly,
    /// Recreated every month.
    Monthly,
    /// Never recreated.
    Once,
}

impl RepeatInterval {
    /// Stored identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yearly => "yearly",
            Self::Monthly => "monthly",
            Self::Once => "once",
        }
    }
}

/// Error parsing a repeat interval identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown repeat interval: {0:?}")]
pub struct RepeatIntervalParseError(pub String);

impl std::str::FromStr for RepeatInterval {
    type Err = RepeatIntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yearly" => Ok(Self::Yearly),
            "monthly" => Ok(Self::Monthly),
            "once" => Ok(Self::Once),
            other => Err(RepeatIntervalParseError(other.to_string())),
        }
    }
}

// ─── Progress ────────────────────────────────────────────────────────

/// Completion percentage, 0–100.
///
/// Derived from RFI and checklist completion; the validator only reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Progress(u8);

/// Progress outside 0–100.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("progress must be between 0 and 100, got {0}")]
pub struct ProgressError(pub u32);

impl Progress {
    /// No work done.
    pub const ZERO: Progress = Progress(0);

    /// From a percentage.
    pub fn from_percent(percent: u8) -> Result<Self, ProgressError> {
        if percent > 100 {
            return Err(ProgressError(u32::from(percent)));
        }
        Ok(Self(percent))
    }

    /// From completed/total child items, rounded down. No items means zero.
    pub fn from_counts(completed: u32, total: u32) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        let completed = u64::from(completed.min(total));
        // completed <= total, so the quotient is at most 100.
        Self((completed * 100 / u64::from(total)) as u8)
    }

    /// The percentage.
    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Whether no work was done.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for Progress {
    type Error = ProgressError;

    fn try_from(percent: u8) -> Result<Self, Self::Error> {
        Self::from_percent(percent)
    }
}

impl From<Progress> for u8 {
    fn from(progress: Progress) -> Self {
        progress.0
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// ─── Engagement ──────────────────────────────────────────────────────

/// An audit engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    /// Immutable identifier.
    pub id: EngagementId,
    /// Current workflow stage.
    pub stage: Stage,
    /// Administrative status.
    pub status: EngagementStatus,
    /// Scheduled start of the engagement.
    pub commencement_date: Option<Timestamp>,
    /// Completion of child RFIs and checklists.
    pub progress: Progress,
    /// Whether the client accepted the engagement letter.
    pub engagement_letter_accepted: bool,
    /// Failed auto-transition attempts. Never reset.
    pub transition_attempts: u32,
    /// Recreation cadence.
    pub repeat_interval: RepeatInterval,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl Engagement {
    /// A new engagement in `info_gathering`, status `pending`.
    pub fn new(id: EngagementId, commencement_date: Option<Timestamp>, now: Timestamp) -> Self {
        Self {
            id,
            stage: Stage::InfoGathering,
            status: EngagementStatus::Pending,
            commencement_date,
            progress: Progress::ZERO,
            engagement_letter_accepted: false,
            transition_attempts: 0,
            repeat_interval: RepeatInterval::Yearly,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply business-field changes and bump `updated_at`.
    pub fn apply(&mut self, changes: &EngagementChanges, at: Timestamp) {
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(date) = changes.commencement_date {
            self.commencement_date = Some(date);
        }
        if let Some(progress) = changes.progress {
            self.progress = progress;
        }
        if let Some(accepted) = changes.engagement_letter_accepted {
            self.engagement_letter_accepted = accepted;
        }
        if let Some(interval) = changes.repeat_interval {
            self.repeat_interval = interval;
        }
        self.updated_at = at;
    }

    /// Snapshot of the fields a transition is validated against.
    pub fn guard(&self) -> TransitionGuard {
        TransitionGuard {
            stage: self.stage,
            commencement_date: self.commencement_date,
            progress: self.progress,
            engagement_letter_accepted: self.engagement_letter_accepted,
        }
    }
}

/// The stage and gate inputs a transition was approved on.
///
/// A stage write is applied only while the stored record still matches its
/// guard; a concurrent change to any gate input turns the write into a
/// conflict instead of a transition the gates never saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionGuard {
    /// Stage at validation time.
    pub stage: Stage,
    /// Commencement date at validation time.
    pub commencement_date: Option<Timestamp>,
    /// Progress at validation time.
    pub progress: Progress,
    /// Letter acceptance at validation time.
    pub engagement_letter_accepted: bool,
}

impl TransitionGuard {
    /// Whether `engagement` still carries the guarded values.
    pub fn matches(&self, engagement: &Engagement) -> bool {
        *self == engagement.guard()
    }
}

/// Business-field changes submitted alongside, or instead of, a stage change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngagementChanges {
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EngagementStatus>,
    /// New commencement date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commencement_date: Option<Timestamp>,
    /// New progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// New letter acceptance flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_letter_accepted: Option<bool>,
    /// New recreation cadence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<RepeatInterval>,
}

impl EngagementChanges {
    /// Whether no field is changed.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.commencement_date.is_none()
            && self.progress.is_none()
            && self.engagement_letter_accepted.is_none()
            && self.repeat_interval.is_none()
    }
}
