//! On-enter side-effect delivery.
//!
//! The engine hands each `on_enter` action of a newly entered stage to a
//! [`NotificationDispatcher`]. Template rendering and mail delivery belong to
//! the dispatcher implementation; the engine only queues.

use async_trait::async_trait;
use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{Actor, OnEnterAction, Stage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data handed to an email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContext {
    /// Subject engagement.
    pub engagement_id: EngagementId,
    /// Stage just entered.
    pub stage: Stage,
    /// Action that triggered the email.
    pub action: OnEnterAction,
    /// Who moved the engagement.
    pub triggered_by: Actor,
    /// When the stage was entered.
    pub at: Timestamp,
}

/// Errors queueing a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The dispatcher refused the message.
    #[error("notification rejected: {0}")]
    Rejected(String),

    /// The delivery backend could not be reached.
    #[error("notification backend unavailable: {0}")]
    Unavailable(String),
}

/// Queues templated emails.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Queue one email rendered from `template_key`.
    async fn queue_email(
        &self,
        template_key: &str,
        context: &NotificationContext,
    ) -> Result<(), NotifyError>;
}

/// Dispatcher that only emits a tracing event per email.
///
/// Used by the CLI and in development, where no mail backend is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn queue_email(
        &self,
        template_key: &str,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            template = template_key,
            engagement_id = %context.engagement_id,
            stage = %context.stage,
            action = %context.action,
            "email queued"
        );
        Ok(())
    }
}
