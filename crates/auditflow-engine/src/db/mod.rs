//! # Database Persistence Layer
//!
//! PostgreSQL implementation of [`EngagementStore`] and [`ActivityLog`] via
//! SQLx.
//!
//! The database is **optional**. When no `DATABASE_URL` is configured the
//! binary runs on [`MemoryStore`](crate::store::MemoryStore) and nothing
//! survives a restart.
//!
//! Stage rules are enforced in the engine, not in SQL. The one guarantee the
//! database provides is the compare-and-swap on `stage` and the gate columns
//! (`UPDATE ... WHERE id = $1 AND stage = $2 AND ...`), which serializes
//! concurrent writes to the same engagement.

pub mod activity;
pub mod engagements;

use async_trait::async_trait;
use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{Engagement, EngagementChanges, Stage, TransitionGuard};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::activity::ActivityEntry;
use crate::store::{ActivityLog, EngagementFilter, EngagementStore, StoreError};

/// Connect to PostgreSQL and run the embedded migrations.
///
/// Returns `None` if no URL is configured (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// PostgreSQL-backed engagement store and activity log.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Store over an initialized pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EngagementStore for PgStore {
    async fn get(&self, id: EngagementId) -> Result<Option<Engagement>, StoreError> {
        engagements::get_by_id(&self.pool, id).await
    }

    async fn list(&self, filter: &EngagementFilter) -> Result<Vec<Engagement>, StoreError> {
        engagements::list(&self.pool, filter).await
    }

    async fn create(&self, engagement: &Engagement) -> Result<(), StoreError> {
        engagements::insert(&self.pool, engagement).await
    }

    async fn update_fields(
        &self,
        id: EngagementId,
        expected: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        engagements::update_fields(&self.pool, id, expected, changes, at).await
    }

    async fn compare_and_set_stage(
        &self,
        id: EngagementId,
        expected: &TransitionGuard,
        to: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        engagements::compare_and_set_stage(&self.pool, id, expected, to, changes, at).await
    }

    async fn increment_transition_attempts(&self, id: EngagementId) -> Result<u32, StoreError> {
        engagements::increment_transition_attempts(&self.pool, id).await
    }
}

#[async_trait]
impl ActivityLog for PgStore {
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        activity::insert(&self.pool, &entry).await
    }

    async fn history(&self, engagement_id: EngagementId) -> Result<Vec<ActivityEntry>, StoreError> {
        activity::list_for_engagement(&self.pool, engagement_id).await
    }
}
