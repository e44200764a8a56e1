//! Activity log persistence operations.
//!
//! Entries are immutable once written; there are no update operations.

use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{Actor, Stage};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::activity::{ActivityAction, ActivityEntry};
use crate::store::StoreError;

/// Insert one activity entry.
pub async fn insert(pool: &PgPool, entry: &ActivityEntry) -> Result<(), StoreError> {
    let actor = serde_json::to_value(entry.actor).map_err(|e| StoreError::Corrupt {
        id: entry.id,
        reason: format!("failed to serialize actor: {e}"),
    })?;

    sqlx::query(
        "INSERT INTO activity_log (id, engagement_id, action, from_stage, to_stage, actor, reason, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id)
    .bind(*entry.engagement_id.as_uuid())
    .bind(entry.action.as_str())
    .bind(entry.from.as_str())
    .bind(entry.to.map(|s| s.as_str()))
    .bind(&actor)
    .bind(entry.reason.as_deref())
    .bind(*entry.at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Entries for one engagement, oldest first.
pub async fn list_for_engagement(
    pool: &PgPool,
    engagement_id: EngagementId,
) -> Result<Vec<ActivityEntry>, StoreError> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        "SELECT id, engagement_id, action, from_stage, to_stage, actor, reason, created_at
         FROM activity_log WHERE engagement_id = $1 ORDER BY created_at, id",
    )
    .bind(*engagement_id.as_uuid())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ActivityRow::into_entry).collect()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    engagement_id: Uuid,
    action: String,
    from_stage: String,
    to_stage: Option<String>,
    actor: serde_json::Value,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl ActivityRow {
    fn into_entry(self) -> Result<ActivityEntry, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let action: ActivityAction = self
            .action
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let from: Stage = self
            .from_stage
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let to = self
            .to_stage
            .map(|s| s.parse::<Stage>())
            .transpose()
            .map_err(|e| corrupt(format!("{e}")))?;
        let actor: Actor =
            serde_json::from_value(self.actor).map_err(|e| corrupt(format!("actor: {e}")))?;

        Ok(ActivityEntry {
            id,
            engagement_id: EngagementId::from(self.engagement_id),
            action,
            from,
            to,
            actor,
            reason: self.reason,
            at: Timestamp::from_utc(self.created_at),
        })
    }
}
