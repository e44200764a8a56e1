//! # Engine Wiring
//!
//! Builds a [`LifecycleEngine`] from [`AuditflowConfig`]: stage rules from
//! the configured file or the built-in set, PostgreSQL when `DATABASE_URL` is
//! set and the in-memory store otherwise.

use std::sync::Arc;

use anyhow::{Context, Result};
use auditflow_core::SystemClock;
use auditflow_engine::db::init_pool;
use auditflow_engine::{
    ActivityLog, AuditflowConfig, EngagementStore, LifecycleEngine, LogDispatcher, MemoryStore,
    PgStore,
};

/// Connect to the configured backend and assemble an engine.
pub async fn build_engine(config: &AuditflowConfig) -> Result<LifecycleEngine> {
    let registry = config
        .load_registry()
        .context("failed to load stage rules")?;

    let pool = init_pool(config.database_url.as_deref())
        .await
        .context("database initialization failed")?;

    let (store, activity): (Arc<dyn EngagementStore>, Arc<dyn ActivityLog>) = match pool {
        Some(pool) => {
            let pg = PgStore::new(pool);
            (Arc::new(pg.clone()), Arc::new(pg))
        }
        None => {
            let memory = MemoryStore::new();
            (Arc::new(memory.clone()), Arc::new(memory))
        }
    };

    tracing::debug!(workflow = registry.workflow(), "lifecycle engine ready");

    Ok(LifecycleEngine::new(
        Arc::new(registry),
        store,
        activity,
        Arc::new(LogDispatcher),
        Arc::new(SystemClock),
        config.engine_config(),
    ))
}
