//! # Lifecycle Engine Flows
//!
//! End-to-end transitions through `LifecycleEngine` on the in-memory store:
//! activity logging, permission-denial auditing, read-only close-out,
//! bundled field changes against the gates, on-enter dispatch, and
//! compare-and-swap conflicts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auditflow_core::{ActorId, EngagementId, FixedClock, Timestamp};
use auditflow_engine::{
    ActivityAction, ActivityLog, EngagementFilter, EngagementStore, EngineConfig,
    LifecycleEngine, LifecycleError, LogDispatcher, MemoryStore, NotificationContext,
    NotificationDispatcher, NotifyError, StoreError, TransitionRequest,
};
use auditflow_state::{
    Actor, Engagement, EngagementChanges, OnEnterAction, Progress, ReasonCode, Role, Stage,
    StageRegistry, TransitionGuard,
};
use tokio::sync::mpsc;

const DAY: i64 = 86_400;

fn now() -> Timestamp {
    Timestamp::parse("2026-09-01T10:00:00Z").unwrap()
}

fn user(role: Role) -> Actor {
    Actor::user(ActorId::new(), role)
}

fn engine_with(
    store: Arc<dyn EngagementStore>,
    activity: Arc<dyn ActivityLog>,
    notifier: Arc<dyn NotificationDispatcher>,
) -> LifecycleEngine {
    LifecycleEngine::new(
        Arc::new(StageRegistry::standard()),
        store,
        activity,
        notifier,
        Arc::new(FixedClock::new(now())),
        EngineConfig {
            dispatch_timeout: Duration::from_millis(200),
        },
    )
}

fn engine(store: &MemoryStore) -> LifecycleEngine {
    engine_with(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(LogDispatcher),
    )
}

async fn seed(store: &MemoryStore, stage: Stage, edit: impl FnOnce(&mut Engagement)) -> Engagement {
    let mut e = Engagement::new(EngagementId::new(), Some(now().offset_secs(-10 * DAY)), now().offset_secs(-30 * DAY));
    e.stage = stage;
    edit(&mut e);
    store.create(&e).await.unwrap();
    e
}

// ─── Dispatchers ─────────────────────────────────────────────────────

struct ChannelDispatcher(mpsc::UnboundedSender<(String, NotificationContext)>);

#[async_trait]
impl NotificationDispatcher for ChannelDispatcher {
    async fn queue_email(
        &self,
        template_key: &str,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        self.0
            .send((template_key.to_string(), context.clone()))
            .map_err(|e| NotifyError::Unavailable(e.to_string()))
    }
}

struct FailingDispatcher;

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn queue_email(&self, _: &str, _: &NotificationContext) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("smtp relay down".into()))
    }
}

/// Store whose `get` always returns a fixed snapshot, simulating a read
/// that lost a race with a concurrent writer.
struct StaleReadStore {
    inner: MemoryStore,
    snapshot: Engagement,
}

#[async_trait]
impl EngagementStore for StaleReadStore {
    async fn get(&self, _: EngagementId) -> Result<Option<Engagement>, StoreError> {
        Ok(Some(self.snapshot.clone()))
    }

    async fn list(&self, filter: &EngagementFilter) -> Result<Vec<Engagement>, StoreError> {
        self.inner.list(filter).await
    }

    async fn create(&self, engagement: &Engagement) -> Result<(), StoreError> {
        self.inner.create(engagement).await
    }

    async fn update_fields(
        &self,
        id: EngagementId,
        expected: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        self.inner.update_fields(id, expected, changes, at).await
    }

    async fn compare_and_set_stage(
        &self,
        id: EngagementId,
        expected: &TransitionGuard,
        to: Stage,
        changes: &EngagementChanges,
        at: Timestamp,
    ) -> Result<Option<Engagement>, StoreError> {
        self.inner
            .compare_and_set_stage(id, expected, to, changes, at)
            .await
    }

    async fn increment_transition_attempts(&self, id: EngagementId) -> Result<u32, StoreError> {
        self.inner.increment_transition_attempts(id).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn walks_the_full_workflow() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::InfoGathering, |_| {}).await;
    let engine = engine(&store);
    let partner = user(Role::Partner);

    for to in [
        Stage::Commencement,
        Stage::TeamExecution,
        Stage::PartnerReview,
        Stage::Finalization,
        Stage::CloseOut,
    ] {
        let updated = engine
            .transition(TransitionRequest::new(e.id, to, partner))
            .await
            .unwrap_or_else(|err| panic!("move to {to} failed: {err}"));
        assert_eq!(updated.stage, to);
    }

    let log = store.history(e.id).await.unwrap();
    assert_eq!(log.len(), 5);
    assert!(log.iter().all(|entry| entry.action == ActivityAction::StageChange));
    assert_eq!(log[4].from, Stage::Finalization);
    assert_eq!(log[4].to, Some(Stage::CloseOut));
}

#[tokio::test]
async fn permission_denial_is_written_to_activity_log() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::Finalization, |_| {}).await;
    let manager = user(Role::Manager);

    let err = engine(&store)
        .transition(TransitionRequest::new(e.id, Stage::CloseOut, manager).with_reason("wrap up"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::InsufficientPermissions));
    assert_eq!(err.http_status(), 403);

    let log = store.history(e.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, ActivityAction::PermissionDenied);
    assert_eq!(log[0].actor, manager);
    assert_eq!(log[0].from, Stage::Finalization);
    assert_eq!(log[0].to, Some(Stage::CloseOut));
    assert_eq!(log[0].reason.as_deref(), Some("wrap up"));

    let stored = store.get(e.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::Finalization);
}

#[tokio::test]
async fn other_denials_are_not_written_to_activity_log() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::Finalization, |e| {
        e.progress = Progress::from_percent(45).unwrap();
    })
    .await;

    let err = engine(&store)
        .transition(TransitionRequest::new(e.id, Stage::CloseOut, user(Role::Partner)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::CloseoutGateNotMet));
    assert!(store.history(e.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn closed_engagement_is_read_only() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::Finalization, |_| {}).await;
    let engine = engine(&store);
    let partner = user(Role::Partner);

    engine
        .transition(TransitionRequest::new(e.id, Stage::CloseOut, partner))
        .await
        .unwrap();

    let changes = EngagementChanges {
        engagement_letter_accepted: Some(true),
        ..EngagementChanges::default()
    };
    let err = engine
        .update_fields(e.id, changes, partner)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::StageReadonly));
    assert_eq!(err.http_status(), 403);

    for to in Stage::ALL {
        let err = engine
            .transition(TransitionRequest::new(e.id, to, partner))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Denied(_)), "{to}: {err}");
    }

    let stored = store.get(e.id).await.unwrap().unwrap();
    assert!(!stored.engagement_letter_accepted);
}

#[tokio::test]
async fn field_changes_cannot_ride_along_into_close_out() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::Finalization, |_| {}).await;
    let request = TransitionRequest::new(e.id, Stage::CloseOut, user(Role::Partner)).with_changes(
        EngagementChanges {
            engagement_letter_accepted: Some(true),
            ..EngagementChanges::default()
        },
    );
    let err = engine(&store).transition(request).await.unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::StageReadonly));
}

#[tokio::test]
async fn field_changes_apply_with_the_stage_change() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::TeamExecution, |_| {}).await;
    let request = TransitionRequest::new(e.id, Stage::PartnerReview, user(Role::Manager))
        .with_changes(EngagementChanges {
            progress: Some(Progress::from_percent(90).unwrap()),
            ..EngagementChanges::default()
        });
    let updated = engine(&store).transition(request).await.unwrap();
    assert_eq!(updated.stage, Stage::PartnerReview);
    assert_eq!(updated.progress.percent(), 90);
}

#[tokio::test]
async fn bundled_changes_cannot_break_the_gates_they_enter() {
    let store = MemoryStore::new();
    let engine = engine(&store);
    let partner = user(Role::Partner);

    let e = seed(&store, Stage::InfoGathering, |_| {}).await;
    let request = TransitionRequest::new(e.id, Stage::Commencement, partner).with_changes(
        EngagementChanges {
            commencement_date: Some(now().offset_secs(30 * DAY)),
            ..EngagementChanges::default()
        },
    );
    let err = engine.transition(request).await.unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::CommencementDateInFuture));
    let stored = store.get(e.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::InfoGathering);
    assert_eq!(stored.commencement_date, e.commencement_date);

    let e = seed(&store, Stage::PartnerReview, |e| {
        e.engagement_letter_accepted = true;
    })
    .await;
    let request = TransitionRequest::new(e.id, Stage::Finalization, partner).with_changes(
        EngagementChanges {
            engagement_letter_accepted: Some(false),
            progress: Some(Progress::from_percent(80).unwrap()),
            ..EngagementChanges::default()
        },
    );
    let err = engine.transition(request).await.unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::AdvanceGateNotMet));
    let stored = store.get(e.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::PartnerReview);
    assert!(stored.engagement_letter_accepted);
}

#[tokio::test]
async fn bundled_changes_do_not_lift_a_gate_the_stored_record_fails() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::PartnerReview, |e| {
        e.progress = Progress::from_percent(50).unwrap();
    })
    .await;
    let request = TransitionRequest::new(e.id, Stage::Finalization, user(Role::Partner))
        .with_changes(EngagementChanges {
            engagement_letter_accepted: Some(true),
            ..EngagementChanges::default()
        });

    let err = engine(&store).transition(request).await.unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::AdvanceGateNotMet));
    assert!(!store.get(e.id).await.unwrap().unwrap().engagement_letter_accepted);
}

#[tokio::test]
async fn gate_input_changed_after_read_surfaces_as_conflict() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::PartnerReview, |e| {
        e.progress = Progress::from_percent(50).unwrap();
    })
    .await;
    let mut snapshot = e.clone();
    snapshot.engagement_letter_accepted = true;

    let stale = Arc::new(StaleReadStore {
        inner: store.clone(),
        snapshot,
    });
    let engine = engine_with(stale, Arc::new(store.clone()), Arc::new(LogDispatcher));

    let err = engine
        .transition(TransitionRequest::new(e.id, Stage::Finalization, user(Role::Partner)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ReasonCode::StageConflict));
    assert_eq!(store.get(e.id).await.unwrap().unwrap().stage, Stage::PartnerReview);
    assert!(store.history(e.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn on_enter_actions_are_dispatched() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::TeamExecution, |_| {}).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = engine_with(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(ChannelDispatcher(tx)),
    );
    let manager = user(Role::Manager);

    engine
        .transition(TransitionRequest::new(e.id, Stage::PartnerReview, manager))
        .await
        .unwrap();

    let (template, context) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(template, "partner_review_ready");
    assert_eq!(context.engagement_id, e.id);
    assert_eq!(context.stage, Stage::PartnerReview);
    assert_eq!(context.action, OnEnterAction::NotifyPartnerReview);
    assert_eq!(context.triggered_by, manager);
}

#[tokio::test]
async fn stages_without_on_enter_dispatch_nothing() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::Commencement, |_| {}).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = engine_with(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(ChannelDispatcher(tx)),
    );

    engine
        .transition(TransitionRequest::new(e.id, Stage::TeamExecution, user(Role::Clerk)))
        .await
        .unwrap();
    drop(engine);

    // Every sender is gone once the engine is dropped and no task holds one.
    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn failed_side_effect_does_not_roll_back() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::PartnerReview, |_| {}).await;
    let engine = engine_with(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(FailingDispatcher),
    );

    let updated = engine
        .transition(TransitionRequest::new(e.id, Stage::Finalization, user(Role::Partner)))
        .await
        .unwrap();
    assert_eq!(updated.stage, Stage::Finalization);

    let updated = engine
        .transition(TransitionRequest::new(e.id, Stage::CloseOut, user(Role::Partner)))
        .await
        .unwrap();
    assert_eq!(updated.stage, Stage::CloseOut);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.get(e.id).await.unwrap().unwrap().stage, Stage::CloseOut);
}

#[tokio::test]
async fn stale_read_surfaces_as_stage_conflict() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::PartnerReview, |_| {}).await;
    let mut snapshot = e.clone();
    snapshot.stage = Stage::TeamExecution;

    let stale = Arc::new(StaleReadStore {
        inner: store.clone(),
        snapshot,
    });
    let engine = engine_with(stale, Arc::new(store.clone()), Arc::new(LogDispatcher));

    let err = engine
        .transition(TransitionRequest::new(e.id, Stage::PartnerReview, user(Role::Manager)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Conflict {
            expected: Stage::TeamExecution,
            ..
        }
    ));
    assert_eq!(err.code(), Some(ReasonCode::StageConflict));
    assert_eq!(err.http_status(), 409);
    assert!(store.history(e.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transitions_from_one_stage_apply_once() {
    let store = MemoryStore::new();
    let e = seed(&store, Stage::TeamExecution, |_| {}).await;
    let engine = engine(&store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .transition(TransitionRequest::new(e.id, Stage::PartnerReview, user(Role::Manager)))
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(err) => assert!(
                matches!(err.code(), Some(ReasonCode::StageConflict | ReasonCode::NoOp)),
                "unexpected error: {err}"
            ),
        }
    }
    assert_eq!(applied, 1);

    let changes: Vec<_> = store
        .history(e.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.action == ActivityAction::StageChange)
        .collect();
    assert_eq!(changes.len(), 1);
}
