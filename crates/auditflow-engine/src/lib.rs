//! # auditflow-engine — Engagement Lifecycle Engine
//!
//! The effectful half of the engagement workflow. `auditflow-state` decides
//! whether a transition may happen; this crate makes it happen.
//!
//! ## Modules
//!
//! - **Engine** (`engine.rs`): `LifecycleEngine::transition()` loads the
//!   engagement, validates, compare-and-swaps the stage, dispatches
//!   `on_enter` side effects, and writes the activity log.
//!
//! - **Scanner** (`scanner.rs`): the commencement-date auto-transition pass,
//!   with a per-engagement attempt counter as circuit breaker.
//!
//! - **Store** (`store.rs`): the `EngagementStore` / `ActivityLog` traits and
//!   the in-memory implementation.
//!
//! - **Database** (`db/`): the PostgreSQL implementation with embedded
//!   migrations.
//!
//! - **Notify** (`notify.rs`): the `NotificationDispatcher` seam for
//!   on-enter emails.
//!
//! - **Config** (`config.rs`): environment-driven runtime configuration.
//!
//! ## Concurrency
//!
//! All persistence calls are `.await` points; the validator never suspends.
//! Transitions on one engagement are serialized by the store's
//! compare-and-swap, not by an engine-level lock, so different engagements
//! proceed independently.

pub mod activity;
pub mod config;
pub mod db;
pub mod engine;
pub mod notify;
pub mod scanner;
pub mod store;

pub use activity::{ActionParseError, ActivityAction, ActivityEntry};
pub use config::{AuditflowConfig, ConfigError, LogFormat};
pub use db::PgStore;
pub use engine::{EngineConfig, LifecycleEngine, LifecycleError, TransitionRequest};
pub use notify::{LogDispatcher, NotificationContext, NotificationDispatcher, NotifyError};
pub use scanner::{AutoTransitionScanner, ScanSummary, ScannerConfig, AUTO_TRANSITION_REASON};
pub use store::{ActivityLog, EngagementFilter, EngagementStore, MemoryStore, StoreError};
