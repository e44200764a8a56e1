//! Engagement persistence operations.
//!
//! All functions take a `&PgPool` and operate on the `engagements` table.
//! Rows that fail to decode (unknown stage, out-of-range progress) are
//! reported as [`StoreError::Corrupt`] rather than silently defaulted: a
//! record with an unknown stage must never reach the validator.

use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{
    Engagement, EngagementChanges, EngagementStatus, Progress, RepeatInterval, Stage,
    TransitionGuard,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{EngagementFilter, StoreError};

const COLUMNS: &str = "id, stage, status, commencement_date, progress, engagement_letter_accepted, \
     transition_attempts, repeat_interval, created_at, updated_at";

/// Insert a new engagement.
pub async fn insert(pool: &PgPool, engagement: &Engagement) -> Result<(), StoreError> {
    let result = sqlx::query(
        "INSERT INTO engagements (id, stage, status, commencement_date, progress,
         engagement_letter_accepted, transition_attempts, repeat_interval, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(*engagement.id.as_uuid())
    .bind(engagement.stage.as_str())
    .bind(engagement.status.as_str())
    .bind(engagement.commencement_date.map(to_utc))
    .bind(i16::from(engagement.progress.percent()))
    .bind(engagement.engagement_letter_accepted)
    .bind(i32::try_from(engagement.transition_attempts).unwrap_or(i32::MAX))
    .bind(engagement.repeat_interval.as_str())
    .bind(to_utc(engagement.created_at))
    .bind(to_utc(engagement.updated_at))
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::Duplicate(engagement.id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Fetch an engagement by ID.
pub async fn get_by_id(pool: &PgPool, id: EngagementId) -> Result<Option<Engagement>, StoreError> {
    let row = sqlx::query_as::<_, EngagementRow>(&format!(
        "SELECT {COLUMNS} FROM engagements WHERE id = $1"
    ))
    .bind(*id.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.map(EngagementRow::into_record).transpose()
}

/// List engagements matching `filter`, oldest first.
pub async fn list(pool: &PgPool, filter: &EngagementFilter) -> Result<Vec<Engagement>, StoreError> {
    let rows = sqlx::query_as::<_, EngagementRow>(&format!(
        "SELECT {COLUMNS} FROM engagements
         WHERE ($1::text IS NULL OR status = $1)
           AND ($2::text IS NULL OR stage = $2)
         ORDER BY created_at, id"
    ))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.stage.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(EngagementRow::into_record).collect()
}

/// Apply field changes if the stored stage still equals `expected`.
pub async fn update_fields(
    pool: &PgPool,
    id: EngagementId,
    expected: Stage,
    changes: &EngagementChanges,
    at: Timestamp,
) -> Result<Option<Engagement>, StoreError> {
    let row = sqlx::query_as::<_, EngagementRow>(&format!(
        "UPDATE engagements SET {SET_CHANGES}, updated_at = $8
         WHERE id = $1 AND stage = $2
         RETURNING {COLUMNS}"
    ))
    .bind(*id.as_uuid())
    .bind(expected.as_str())
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.commencement_date.map(to_utc))
    .bind(changes.progress.map(|p| i16::from(p.percent())))
    .bind(changes.engagement_letter_accepted)
    .bind(changes.repeat_interval.map(|r| r.as_str()))
    .bind(to_utc(at))
    .fetch_optional(pool)
    .await?;

    finish_guarded_update(pool, id, row).await
}

/// Move `expected.stage → to` together with `changes` in one statement.
///
/// The `WHERE` clause repeats every guarded column, so the row is written
/// only if nothing the transition was validated against has changed.
/// Returns `Ok(None)` when the row exists but no longer matches, and
/// `StoreError::NotFound` when there is no row.
pub async fn compare_and_set_stage(
    pool: &PgPool,
    id: EngagementId,
    expected: &TransitionGuard,
    to: Stage,
    changes: &EngagementChanges,
    at: Timestamp,
) -> Result<Option<Engagement>, StoreError> {
    let row = sqlx::query_as::<_, EngagementRow>(&format!(
        "UPDATE engagements SET {SET_CHANGES}, updated_at = $8, stage = $9
         WHERE id = $1 AND stage = $2
           AND commencement_date IS NOT DISTINCT FROM $10
           AND progress = $11
           AND engagement_letter_accepted = $12
         RETURNING {COLUMNS}"
    ))
    .bind(*id.as_uuid())
    .bind(expected.stage.as_str())
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.commencement_date.map(to_utc))
    .bind(changes.progress.map(|p| i16::from(p.percent())))
    .bind(changes.engagement_letter_accepted)
    .bind(changes.repeat_interval.map(|r| r.as_str()))
    .bind(to_utc(at))
    .bind(to.as_str())
    .bind(expected.commencement_date.map(to_utc))
    .bind(i16::from(expected.progress.percent()))
    .bind(expected.engagement_letter_accepted)
    .fetch_optional(pool)
    .await?;

    finish_guarded_update(pool, id, row).await
}

/// `COALESCE` assignments for the optional change columns `$3`..`$7`.
const SET_CHANGES: &str = "status = COALESCE($3, status),
             commencement_date = COALESCE($4, commencement_date),
             progress = COALESCE($5, progress),
             engagement_letter_accepted = COALESCE($6, engagement_letter_accepted),
             repeat_interval = COALESCE($7, repeat_interval)";

async fn finish_guarded_update(
    pool: &PgPool,
    id: EngagementId,
    row: Option<EngagementRow>,
) -> Result<Option<Engagement>, StoreError> {
    match row {
        Some(row) => row.into_record().map(Some),
        None if exists(pool, id).await? => Ok(None),
        None => Err(StoreError::NotFound(id)),
    }
}

/// Increment the failed auto-transition counter.
pub async fn increment_transition_attempts(
    pool: &PgPool,
    id: EngagementId,
) -> Result<u32, StoreError> {
    let attempts = sqlx::query_scalar::<_, i32>(
        "UPDATE engagements SET transition_attempts = transition_attempts + 1
         WHERE id = $1 RETURNING transition_attempts",
    )
    .bind(*id.as_uuid())
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound(id))?;

    u32::try_from(attempts).map_err(|_| StoreError::Corrupt {
        id: *id.as_uuid(),
        reason: format!("negative transition_attempts {attempts}"),
    })
}

async fn exists(pool: &PgPool, id: EngagementId) -> Result<bool, StoreError> {
    let found = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM engagements WHERE id = $1)",
    )
    .bind(*id.as_uuid())
    .fetch_one(pool)
    .await?;
    Ok(found)
}

fn to_utc(ts: Timestamp) -> DateTime<Utc> {
    *ts.as_datetime()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct EngagementRow {
    id: Uuid,
    stage: String,
    status: String,
    commencement_date: Option<DateTime<Utc>>,
    progress: i16,
    engagement_letter_accepted: bool,
    transition_attempts: i32,
    repeat_interval: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EngagementRow {
    fn into_record(self) -> Result<Engagement, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| {
            tracing::warn!(id = %id, reason = %reason, "undecodable engagement row");
            StoreError::Corrupt { id, reason }
        };

        let stage: Stage = self
            .stage
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let status: EngagementStatus = self
            .status
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let repeat_interval: RepeatInterval = self
            .repeat_interval
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let progress = u8::try_from(self.progress)
            .ok()
            .and_then(|p| Progress::from_percent(p).ok())
            .ok_or_else(|| corrupt(format!("progress out of range: {}", self.progress)))?;
        let transition_attempts = u32::try_from(self.transition_attempts).map_err(|_| {
            corrupt(format!(
                "negative transition_attempts: {}",
                self.transition_attempts
            ))
        })?;

        Ok(Engagement {
            id: EngagementId::from(id),
            stage,
            status,
            commencement_date: self.commencement_date.map(Timestamp::from_utc),
            progress,
            engagement_letter_accepted: self.engagement_letter_accepted,
            transition_attempts,
            repeat_interval,
            created_at: Timestamp::from_utc(self.created_at),
            updated_at: Timestamp::from_utc(self.updated_at),
        })
    }
}
