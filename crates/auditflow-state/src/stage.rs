//! # Stage Registry
//!
//! Single source of truth for the engagement workflow: the stage ordering,
//! display metadata, the forward/backward whitelist, and the typed rules
//! attached to each stage.
//!
//! ## Ordering
//!
//! [`Stage::ALL`] is the only place the six stages are listed. Every
//! forward/backward decision derives from [`Stage::index`], which is the
//! position in that array.
//!
//! ## Rules as data
//!
//! The standard rules are built in code by [`StageRegistry::standard`].
//! Operators may replace them with a YAML file loaded through
//! [`StageRegistry::from_yaml`]. Either way the registry is validated once
//! at construction and is immutable afterwards; no rule is re-parsed per
//! transition.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use auditflow_core::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::Role;
use crate::engagement::Engagement;

/// Name of the workflow the standard registry implements.
pub const ENGAGEMENT_WORKFLOW: &str = "engagement_lifecycle";

// ─── Stage ───────────────────────────────────────────────────────────

/// The six ordered stages of an engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    /// Pre-engagement: scoping, client onboarding, document requests.
    InfoGathering = 0,
    /// The engagement has formally started.
    Commencement = 1,
    /// Fieldwork by the audit team.
    TeamExecution = 2,
    /// Partner reviews the team's work.
    PartnerReview = 3,
    /// Reporting and sign-off.
    Finalization = 4,
    /// Closed. Terminal and read-only.
    CloseOut = 5,
}

impl Stage {
    /// All stages in workflow order.
    pub const ALL: [Stage; 6] = [
        Stage::InfoGathering,
        Stage::Commencement,
        Stage::TeamExecution,
        Stage::PartnerReview,
        Stage::Finalization,
        Stage::CloseOut,
    ];

    /// Position of this stage in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Stored identifier (`info_gathering`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InfoGathering => "info_gathering",
            Self::Commencement => "commencement",
            Self::TeamExecution => "team_execution",
            Self::PartnerReview => "partner_review",
            Self::Finalization => "finalization",
            Self::CloseOut => "close_out",
        }
    }

    /// Default display label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InfoGathering => "Info Gathering",
            Self::Commencement => "Commencement",
            Self::TeamExecution => "Team Execution",
            Self::PartnerReview => "Partner Review",
            Self::Finalization => "Finalization",
            Self::CloseOut => "Close Out",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a stage identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown stage: {0:?}")]
pub struct StageParseError(pub String);

impl std::str::FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| StageParseError(s.to_string()))
    }
}

/// Direction of a requested stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Higher stage index.
    Forward,
    /// Lower stage index.
    Backward,
    /// Same stage (a no-op request).
    Same,
}

impl Direction {
    /// Classify `from → to` by stage index.
    pub fn classify(from: Stage, to: Stage) -> Self {
        match to.index().cmp(&from.index()) {
            std::cmp::Ordering::Greater => Self::Forward,
            std::cmp::Ordering::Less => Self::Backward,
            std::cmp::Ordering::Equal => Self::Same,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
            Self::Same => f.write_str("same"),
        }
    }
}

// ─── Rules ───────────────────────────────────────────────────────────

/// A condition on the engagement's commencement date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateCondition {
    /// `commencement_date` is set and `<= now`.
    CommencementDateReached,
}

impl DateCondition {
    /// Evaluate against the engagement at `now`.
    pub fn holds(&self, engagement: &Engagement, now: Timestamp) -> bool {
        match self {
            Self::CommencementDateReached => {
                engagement.commencement_date.is_some_and(|date| date <= now)
            }
        }
    }

    /// Whether the date is set but not yet reached.
    ///
    /// An unset date is not pending: manual entry is only refused while a
    /// scheduled date lies in the future.
    pub fn is_pending(&self, engagement: &Engagement, now: Timestamp) -> bool {
        match self {
            Self::CommencementDateReached => {
                engagement.commencement_date.is_some_and(|date| date > now)
            }
        }
    }
}

/// A declared system-driven transition out of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoTransition {
    /// Destination stage.
    pub to: Stage,
    /// Trigger condition.
    pub condition: DateCondition,
}

/// Restriction on moving backward into a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryRestriction {
    /// Re-entry is only possible while the commencement date is unset or
    /// still in the future.
    BeforeCommencementDate,
}

impl ReentryRestriction {
    /// Whether re-entry is blocked for this engagement at `now`.
    pub fn blocks(&self, engagement: &Engagement, now: Timestamp) -> bool {
        match self {
            Self::BeforeCommencementDate => {
                engagement.commencement_date.is_some_and(|date| date <= now)
            }
        }
    }
}

/// A sign-off condition checked when advancing into a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCondition {
    /// The client accepted the engagement letter, or no work was ever done.
    LetterAcceptedOrNoProgress,
}

impl GateCondition {
    /// Evaluate against the engagement.
    pub fn holds(&self, engagement: &Engagement) -> bool {
        match self {
            Self::LetterAcceptedOrNoProgress => {
                engagement.engagement_letter_accepted || engagement.progress.is_zero()
            }
        }
    }
}

/// Gate on forward entry into a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvanceGate {
    /// Minimum role allowed to advance into the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Additional condition on the engagement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<GateCondition>,
}

/// Restrictions on entering a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageRestrictions {
    /// Condition that must hold for a manual (user-requested) entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_set: Option<DateCondition>,
    /// Role and sign-off gate for forward entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance: Option<AdvanceGate>,
    /// Restriction on backward entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reentry: Option<ReentryRestriction>,
}

/// Side effect dispatched after a stage is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnEnterAction {
    /// Email the engagement letter to the client.
    SendEngagementLetter,
    /// Tell the engagement partner the file is ready for review.
    NotifyPartnerReview,
    /// Tell the team and client the engagement is closed.
    NotifyCloseOut,
}

impl OnEnterAction {
    /// Email template key handed to the notification dispatcher.
    pub fn template_key(&self) -> &'static str {
        match self {
            Self::SendEngagementLetter => "engagement_letter",
            Self::NotifyPartnerReview => "partner_review_ready",
            Self::NotifyCloseOut => "engagement_closed",
        }
    }
}

impl std::fmt::Display for OnEnterAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SendEngagementLetter => "send_engagement_letter",
            Self::NotifyPartnerReview => "notify_partner_review",
            Self::NotifyCloseOut => "notify_close_out",
        };
        f.write_str(s)
    }
}

/// The typed rule set of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageRules {
    /// System-driven transition out of this stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_transition: Option<AutoTransition>,
    /// Restrictions on entering this stage.
    pub restrictions: StageRestrictions,
    /// Side effects dispatched on entry.
    pub on_enter: Vec<OnEnterAction>,
    /// No transition out of, and no field change within, this stage.
    pub readonly: bool,
}

/// Explicit whitelist of destinations from a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedTransitions {
    /// Later stages reachable from here.
    pub forward: Vec<Stage>,
    /// Earlier stages reachable from here.
    pub backward: Vec<Stage>,
}

impl AllowedTransitions {
    /// Whether `to` is whitelisted in either direction.
    pub fn contains(&self, to: Stage) -> bool {
        self.forward.contains(&to) || self.backward.contains(&to)
    }

    /// Whether no destination is whitelisted.
    pub fn is_terminal(&self) -> bool {
        self.forward.is_empty() && self.backward.is_empty()
    }
}

/// Display metadata, whitelist and rules for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDefinition {
    /// The stage being defined.
    pub stage: Stage,
    /// Display label.
    pub label: String,
    /// One-line description for the UI.
    pub description: String,
    /// Whitelisted destinations.
    pub transitions: AllowedTransitions,
    /// Typed rules.
    pub rules: StageRules,
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors loading or validating a stage registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The rule file could not be read.
    #[error("failed to read stage rules from {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The rule file is not valid YAML for the rule schema.
    #[error("invalid stage rule document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The workflow name is empty.
    #[error("workflow name must not be empty")]
    EmptyWorkflowName,

    /// A stage name is not one of the six stages.
    #[error("unknown stage {0:?} in stage rules")]
    UnknownStage(String),

    /// A stage has no definition.
    #[error("stage {0} is not defined")]
    MissingStage(Stage),

    /// A whitelisted destination points the wrong way.
    #[error("{stage} lists {target} as a {declared} transition, but it is {actual}")]
    WrongDirection {
        /// Stage whose whitelist is wrong.
        stage: Stage,
        /// Offending destination.
        target: Stage,
        /// Direction it was listed under.
        declared: Direction,
        /// Direction derived from the stage ordering.
        actual: Direction,
    },

    /// A destination is listed twice.
    #[error("{stage} lists {target} more than once")]
    DuplicateTarget {
        /// Stage whose whitelist is wrong.
        stage: Stage,
        /// Repeated destination.
        target: Stage,
    },

    /// An auto-transition destination is not whitelisted forward.
    #[error("{stage} auto-transitions to {target}, which is not a whitelisted forward transition")]
    AutoTransitionNotWhitelisted {
        /// Stage declaring the auto-transition.
        stage: Stage,
        /// Declared destination.
        target: Stage,
    },
}

// ─── Registry ────────────────────────────────────────────────────────

/// Immutable, validated stage registry.
///
/// Shared across the engine and scanner behind an `Arc`; it has no interior
/// mutability and needs no locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRegistry {
    workflow: String,
    stages: Vec<StageDefinition>,
}

impl StageRegistry {
    /// The built-in engagement workflow.
    pub fn standard() -> Self {
        let definitions = vec![
            StageDefinition {
                stage: Stage::InfoGathering,
                label: Stage::InfoGathering.label().to_string(),
                description: "Scoping, onboarding and initial document requests".to_string(),
                transitions: AllowedTransitions {
                    forward: vec![Stage::Commencement],
                    backward: vec![],
                },
                rules: StageRules {
                    auto_transition: Some(AutoTransition {
                        to: Stage::Commencement,
                        condition: DateCondition::CommencementDateReached,
                    }),
                    restrictions: StageRestrictions {
                        reentry: Some(ReentryRestriction::BeforeCommencementDate),
                        ..StageRestrictions::default()
                    },
                    ..StageRules::default()
                },
            },
            StageDefinition {
                stage: Stage::Commencement,
                label: Stage::Commencement.label().to_string(),
                description: "Engagement letter issued and work formally started".to_string(),
                transitions: AllowedTransitions {
                    forward: vec![Stage::TeamExecution],
                    backward: vec![Stage::InfoGathering],
                },
                rules: StageRules {
                    restrictions: StageRestrictions {
                        manual_set: Some(DateCondition::CommencementDateReached),
                        ..StageRestrictions::default()
                    },
                    on_enter: vec![OnEnterAction::SendEngagementLetter],
                    ..StageRules::default()
                },
            },
            StageDefinition {
                stage: Stage::TeamExecution,
                label: Stage::TeamExecution.label().to_string(),
                description: "Fieldwork, RFIs and checklists".to_string(),
                transitions: AllowedTransitions {
                    forward: vec![Stage::PartnerReview],
                    backward: vec![Stage::InfoGathering, Stage::Commencement],
                },
                rules: StageRules::default(),
            },
            StageDefinition {
                stage: Stage::PartnerReview,
                label: Stage::PartnerReview.label().to_string(),
                description: "Partner review of the team's work".to_string(),
                transitions: AllowedTransitions {
                    forward: vec![Stage::Finalization],
                    backward: vec![
                        Stage::InfoGathering,
                        Stage::Commencement,
                        Stage::TeamExecution,
                    ],
                },
                rules: StageRules {
                    on_enter: vec![OnEnterAction::NotifyPartnerReview],
                    ..StageRules::default()
                },
            },
            StageDefinition {
                stage: Stage::Finalization,
                label: Stage::Finalization.label().to_string(),
                description: "Reporting and partner sign-off".to_string(),
                transitions: AllowedTransitions {
                    forward: vec![Stage::CloseOut],
                    backward: vec![
                        Stage::InfoGathering,
                        Stage::Commencement,
                        Stage::TeamExecution,
                        Stage::PartnerReview,
                    ],
                },
                rules: StageRules {
                    restrictions: StageRestrictions {
                        advance: Some(partner_sign_off()),
                        ..StageRestrictions::default()
                    },
                    ..StageRules::default()
                },
            },
            StageDefinition {
                stage: Stage::CloseOut,
                label: Stage::CloseOut.label().to_string(),
                description: "Engagement closed; the record is frozen".to_string(),
                transitions: AllowedTransitions::default(),
                rules: StageRules {
                    restrictions: StageRestrictions {
                        advance: Some(partner_sign_off()),
                        ..StageRestrictions::default()
                    },
                    on_enter: vec![OnEnterAction::NotifyCloseOut],
                    readonly: true,
                    ..StageRules::default()
                },
            },
        ];

        Self {
            workflow: ENGAGEMENT_WORKFLOW.to_string(),
            stages: definitions,
        }
    }

    /// Build a registry from definitions ordered as [`Stage::ALL`], validating it.
    pub fn new(
        workflow: impl Into<String>,
        stages: Vec<StageDefinition>,
    ) -> Result<Self, RegistryError> {
        let registry = Self {
            workflow: workflow.into(),
            stages,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse and validate a YAML rule document.
    ///
    /// ```yaml
    /// workflow: engagement_lifecycle
    /// stages:
    ///   info_gathering:
    ///     forward: [commencement]
    ///     auto_transition: { to: commencement, condition: commencement_date_reached }
    ///     restrictions: { reentry: before_commencement_date }
    ///   # ... one entry per stage
    /// ```
    pub fn from_yaml(source: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_yaml::from_str(source)?;

        for name in file.stages.keys() {
            name.parse::<Stage>()
                .map_err(|_| RegistryError::UnknownStage(name.clone()))?;
        }

        let mut stages = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let raw = file
                .stages
                .get(stage.as_str())
                .ok_or(RegistryError::MissingStage(stage))?;
            stages.push(raw.resolve(stage)?);
        }

        Self::new(file.workflow, stages)
    }

    /// Read and validate a YAML rule file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    /// Workflow name this registry implements.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// The stages in workflow order.
    pub fn ordered_stages(&self) -> &'static [Stage] {
        &Stage::ALL
    }

    /// Position of a stage in the workflow order.
    pub fn stage_index(&self, stage: Stage) -> usize {
        stage.index()
    }

    /// Direction of `from → to`.
    pub fn direction(&self, from: Stage, to: Stage) -> Direction {
        Direction::classify(from, to)
    }

    /// Full definition of a stage.
    pub fn definition(&self, stage: Stage) -> &StageDefinition {
        &self.stages[stage.index()]
    }

    /// Typed rules of a stage.
    pub fn rules_for(&self, stage: Stage) -> &StageRules {
        &self.definition(stage).rules
    }

    /// Whitelisted destinations from a stage.
    pub fn allowed_transitions(&self, stage: Stage) -> &AllowedTransitions {
        &self.definition(stage).transitions
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.workflow.trim().is_empty() {
            return Err(RegistryError::EmptyWorkflowName);
        }

        for (position, expected) in Stage::ALL.into_iter().enumerate() {
            match self.stages.get(position) {
                Some(def) if def.stage == expected => {}
                _ => return Err(RegistryError::MissingStage(expected)),
            }
        }

        for def in &self.stages {
            check_targets(def.stage, &def.transitions.forward, Direction::Forward)?;
            check_targets(def.stage, &def.transitions.backward, Direction::Backward)?;

            if let Some(auto) = &def.rules.auto_transition {
                if !def.transitions.forward.contains(&auto.to) {
                    return Err(RegistryError::AutoTransitionNotWhitelisted {
                        stage: def.stage,
                        target: auto.to,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn partner_sign_off() -> AdvanceGate {
    AdvanceGate {
        role: Some(Role::Partner),
        requires: Some(GateCondition::LetterAcceptedOrNoProgress),
    }
}

fn check_targets(stage: Stage, targets: &[Stage], declared: Direction) -> Result<(), RegistryError> {
    for (i, target) in targets.iter().enumerate() {
        let actual = Direction::classify(stage, *target);
        if actual != declared {
            return Err(RegistryError::WrongDirection {
                stage,
                target: *target,
                declared,
                actual,
            });
        }
        if targets[..i].contains(target) {
            return Err(RegistryError::DuplicateTarget {
                stage,
                target: *target,
            });
        }
    }
    Ok(())
}

// ─── YAML document ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    workflow: String,
    stages: BTreeMap<String, StageFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageFile {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    forward: Vec<String>,
    #[serde(default)]
    backward: Vec<String>,
    #[serde(default)]
    auto_transition: Option<AutoTransitionFile>,
    #[serde(default)]
    restrictions: StageRestrictions,
    #[serde(default)]
    on_enter: Vec<OnEnterAction>,
    #[serde(default)]
    readonly: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AutoTransitionFile {
    to: String,
    condition: DateCondition,
}

impl StageFile {
    fn resolve(&self, stage: Stage) -> Result<StageDefinition, RegistryError> {
        let auto_transition = match &self.auto_transition {
            Some(auto) => Some(AutoTransition {
                to: parse_stage(&auto.to)?,
                condition: auto.condition,
            }),
            None => None,
        };

        Ok(StageDefinition {
            stage,
            label: self
                .label
                .clone()
                .unwrap_or_else(|| stage.label().to_string()),
            description: self.description.clone().unwrap_or_default(),
            transitions: AllowedTransitions {
                forward: parse_stages(&self.forward)?,
                backward: parse_stages(&self.backward)?,
            },
            rules: StageRules {
                auto_transition,
                restrictions: self.restrictions.clone(),
                on_enter: self.on_enter.clone(),
                readonly: self.readonly,
            },
        })
    }
}

fn parse_stage(name: &str) -> Result<Stage, RegistryError> {
    name.parse()
        .map_err(|_| RegistryError::UnknownStage(name.to_string()))
}

fn parse_stages(names: &[String]) -> Result<Vec<Stage>, RegistryError> {
    names.iter().map(|name| parse_stage(name)).collect()
}

// ─── Tests ───────────────────────────────────────────────────────────
