//! # Record Store
//!
//! The engine reaches persistence only through [`EngagementStore`] and
//! [`ActivityLog`]. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: `parking_lot::RwLock` over a `HashMap`, for tests and
//!   in-memory development mode.
//! - [`PgStore`](crate::db::PgStore): PostgreSQL via `sqlx`.
//!
//! ## Serialization per engagement
//!
//! Stage changes go through [`EngagementStore::compare_and_set_stage`], which
//! applies the new stage only if the stored stage and gate inputs still equal
//! the [`TransitionGuard`] the caller validated against. Two concurrent
//! transitions on one engagement can therefore never both succeed from the
//! same source stage, and a field update racing a transition turns it into a
//! conflict.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use auditflow_core::{EngagementId, Timestamp};
use auditflow_state::{Engagement, EngagementChanges, EngagementStatus, Stage, TransitionGuard};
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::activity::ActivityEntry;

/// Errors from a record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No engagement with this identifier.
    #[error("engagement {0} not found")]
    NotFound(EngagementId),

    /// An engagement with this identifier already exists.
    #[error("engagement {0} already exists")]
    Duplicate(EngagementId),

    /// A stored row does not decode into a valid record.
    #[error("corrupt record {id}: {reason}")]
    Corrupt {
        /// Row identifier.
        id: Uuid,
        /// What failed to decode.
        reason: String,
    },

    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Filter for [`EngagementStore::list`]. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementFilter {
    /// Required status.
    pub status: Option<EngagementStatus>,
    /// Required stage.
    pub stage: Option<Stage>,
}

impl EngagementFilter {
    /// Active engagements in `stage`.
    pub fn active_in(stage: Stage) -> Self {
        Self {
            status: Some(EngagementStatus::Active),
            stage: Some(stage),
        }
    }

    /// Whether an engagement passes the filter.
    pub fn matches(&self, engagement: &Engagement) -> bool {
        self.status.map_or(true, |s| engagement.status == s)
            && self.stage.map_or(true, |s| engagement.stage == s)
    }
}

/// Persistence for engagement records.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Fetch one engagement.
    async fn get(&self, id: EngagementId) -> Result<Option<Engagement>, StoreError>;

    /// All engagements passing `filter`, oldest first.
    async fn list(&self, filter: &EngagementFilter) -> Result<Vec<Engagement>, StoreError>;

    /// Insert a new engagement.
    async fn create(&self, engagement: &Engagement) -> Result<(), StoreError>;

    /// Apply field changes if the stored stage still equals `expected`.
    ///
    /// Returns `Ok(None)` when the stage moved on.
    async fn update_fields(
        &self,
        id: EngagementId,
        expected: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError>;

    /// Move `expected.stage → to` and apply `changes` in one atomic step.
    ///
    /// Returns `Ok(None)` when the stored record no longer matches
    /// `expected`: a different stage or a changed gate input.
    async fn compare_and_set_stage(
        &self,
        id: EngagementId,
        expected: &TransitionGuard,
        to: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError>;

    /// Bump the failed auto-transition counter, returning the new value.
    async fn increment_transition_attempts(&self, id: EngagementId) -> Result<u32, StoreError>;
}

/// Append-only activity log.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one entry.
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError>;

    /// Entries for one engagement, oldest first.
    async fn history(&self, engagement_id: EngagementId) -> Result<Vec<ActivityEntry>, StoreError>;
}

// ─── In-memory store ─────────────────────────────────────────────────

/// Thread-safe in-memory engagement store and activity log.
///
/// Every operation takes the lock once and never holds it across an
/// `.await`, so compare-and-swap runs as a single read-validate-update.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    engagements: Arc<RwLock<HashMap<Uuid, Engagement>>>,
    activity: Arc<RwLock<Vec<ActivityEntry>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored engagements.
    pub fn len(&self) -> usize {
        self.engagements.read().len()
    }

    /// Whether no engagement is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every activity entry in insertion order.
    pub fn activity_entries(&self) -> Vec<ActivityEntry> {
        self.activity.read().clone()
    }

    /// Apply `f` under the write lock if the stored record passes `expected`.
    fn update_if(
        &self,
        id: EngagementId,
        expected: impl FnOnce(&Engagement) -> bool,
        f: impl FnOnce(&mut Engagement),
    ) -> Result<Option<Engagement>, StoreError> {
        let mut guard = self.engagements.write();
        let engagement = guard
            .get_mut(id.as_uuid())
            .ok_or(StoreError::NotFound(id))?;
        if !expected(engagement) {
            return Ok(None);
        }
        f(engagement);
        Ok(Some(engagement.clone()))
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn get(&self, id: EngagementId) -> Result<Option<Engagement>, StoreError> {
        Ok(self.engagements.read().get(id.as_uuid()).cloned())
    }

    async fn list(&self, filter: &EngagementFilter) -> Result<Vec<Engagement>, StoreError> {
        let mut found: Vec<Engagement> = self
            .engagements
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        Ok(found)
    }

    async fn create(&self, engagement: &Engagement) -> Result<(), StoreError> {
        let mut guard = self.engagements.write();
        if guard.contains_key(engagement.id.as_uuid()) {
            return Err(StoreError::Duplicate(engagement.id));
        }
        guard.insert(*engagement.id.as_uuid(), engagement.clone());
        Ok(())
    }

    async fn update_fields(
        &self,
        id: EngagementId,
        expected: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        self.update_if(id, |e| e.stage == expected, |e| e.apply(changes, at))
    }

    async fn compare_and_set_stage(
        &self,
        id: EngagementId,
        expected: &TransitionGuard,
        to: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        self.update_if(id, |e| expected.matches(e), |e| {
            e.apply(changes, at);
            e.stage = to;
        })
    }

    async fn increment_transition_attempts(&self, id: EngagementId) -> Result<u32, StoreError> {
        let mut guard = self.engagements.write();
        let engagement = guard
            .get_mut(id.as_uuid())
            .ok_or(StoreError::NotFound(id))?;
        engagement.transition_attempts = engagement.transition_attempts.saturating_add(1);
        Ok(engagement.transition_attempts)
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        self.activity.write().push(entry);
        Ok(())
    }

    async fn history(&self, engagement_id: EngagementId) -> Result<Vec<ActivityEntry>, StoreError> {
        Ok(self
            .activity
            .read()
            .iter()
            .filter(|entry| entry.engagement_id == engagement_id)
            .cloned()
            .collect())
    }
}
