use super::*;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::ManualClock;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

async fn setup(lease: Option<Duration>) -> (SqliteScheduledJobRuleStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let db = Database::in_memory()
        .await
        .unwrap()
        .with_clock(clock.clone())
        .with_lease(lease);
    (SqliteScheduledJobRuleStore::new(db), clock)
}

fn rule_at(project: &str, at: DateTime<Utc>) -> NewScheduledJobRule {
    NewScheduledJobRule::new(project, json!({ "task": "report" }), at)
}

#[tokio::test]
async fn test_create_and_fetch() {
    let (store, _) = setup(None).await;
    let at = start() + chrono::Duration::hours(1);

    let rule = store.create(rule_at("p1", at)).await.unwrap();
    assert_eq!(rule.status, ScheduledJobRuleStatus::Pending);
    assert_eq!(rule.next_run_at, at);
    assert_eq!(rule.version, 1);
    assert!(!rule.is_processed());

    assert_eq!(store.fetch(rule.id).await.unwrap(), Some(rule));
}

#[tokio::test]
async fn test_poll_skips_rules_not_yet_due() {
    let (store, clock) = setup(None).await;
    let rule = store
        .create(rule_at("p1", start() + chrono::Duration::minutes(5)))
        .await
        .unwrap();

    assert!(store.poll("w1").await.unwrap().is_none());

    clock.advance(chrono::Duration::minutes(5));
    let claimed = store.poll("w1").await.unwrap().unwrap();
    assert_eq!(claimed.id, rule.id);
    assert_eq!(claimed.status, ScheduledJobRuleStatus::Processing);
}

#[tokio::test]
async fn test_poll_orders_by_next_run() {
    let (store, _) = setup(None).await;
    let later = store
        .create(rule_at("p1", start() - chrono::Duration::minutes(1)))
        .await
        .unwrap();
    let earlier = store
        .create(rule_at("p1", start() - chrono::Duration::minutes(10)))
        .await
        .unwrap();

    assert_eq!(store.poll("w1").await.unwrap().unwrap().id, earlier.id);
    assert_eq!(store.poll("w1").await.unwrap().unwrap().id, later.id);
}

#[tokio::test]
async fn test_past_due_rule_fires_once() {
    let (store, _) = setup(None).await;
    let rule = store
        .create(rule_at("p1", start() - chrono::Duration::minutes(1)))
        .await
        .unwrap();

    let (first, second) = tokio::join!(store.poll("w1"), store.poll("w2"));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.is_some() != second.is_some());
    let claimed = first.or(second).unwrap();
    assert_eq!(claimed.id, rule.id);

    let updated = store
        .update(
            claimed.id,
            claimed.version,
            ScheduledJobRuleUpdate::new()
                .with_status(ScheduledJobRuleStatus::Triggered)
                .with_output(json!({ "job_id": "j-1" })),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ScheduledJobRuleStatus::Triggered);
    assert_eq!(updated.processed_at, Some(start()));

    let released = store.release(claimed.id).await.unwrap();
    assert_eq!(released.status, ScheduledJobRuleStatus::Triggered);
    assert!(!released.is_locked());
    assert_eq!(released.output, Some(json!({ "job_id": "j-1" })));

    assert!(store.poll("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_declined_rule_reverts_to_pending() {
    let (store, _) = setup(None).await;
    store.create(rule_at("p1", start())).await.unwrap();

    let claimed = store.poll("w1").await.unwrap().unwrap();
    let released = store.release(claimed.id).await.unwrap();
    assert_eq!(released.status, ScheduledJobRuleStatus::Pending);
    assert!(released.processed_at.is_none());

    assert_eq!(store.poll("w2").await.unwrap().unwrap().id, claimed.id);
}

#[tokio::test]
async fn test_release_of_unlocked_rule_does_not_bump_version() {
    let (store, _) = setup(None).await;
    let rule = store.create(rule_at("p1", start())).await.unwrap();

    let released = store.release(rule.id).await.unwrap();
    assert_eq!(released.version, rule.version);
}

#[tokio::test]
async fn test_stale_update_is_rejected() {
    let (store, _) = setup(None).await;
    store.create(rule_at("p1", start())).await.unwrap();
    let claimed = store.poll("w1").await.unwrap().unwrap();

    store
        .update(claimed.id, claimed.version, ScheduledJobRuleUpdate::new().with_output(json!(1)))
        .await
        .unwrap();
    let err = store
        .update(claimed.id, claimed.version, ScheduledJobRuleUpdate::new().with_output(json!(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::VersionConflict { .. }));
}

#[tokio::test]
async fn test_delete_unlocked_and_unknown() {
    let (store, _) = setup(None).await;
    let rule = store.create(rule_at("p1", start())).await.unwrap();

    assert!(store.delete(rule.id).await.unwrap());
    assert!(!store.delete(rule.id).await.unwrap());
    assert!(!store.delete(Uuid::new_v4()).await.unwrap());
    assert!(store.fetch(rule.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_while_locked_tombstones() {
    let (store, _) = setup(None).await;
    store.create(rule_at("p1", start())).await.unwrap();
    let claimed = store.poll("w1").await.unwrap().unwrap();

    assert!(store.delete(claimed.id).await.unwrap());
    assert!(store.fetch(claimed.id).await.unwrap().is_none());
    assert!(store.list("p1", None, 10).await.unwrap().items.is_empty());
    assert!(store.poll("w2").await.unwrap().is_none());

    let err = store
        .update(
            claimed.id,
            claimed.version,
            ScheduledJobRuleUpdate::new().with_status(ScheduledJobRuleStatus::Triggered),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let err = store.heartbeat(claimed.id, "w1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let err = store.release(claimed.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test]
async fn test_expired_lease_lets_another_worker_claim() {
    let (store, clock) = setup(Some(Duration::from_secs(60))).await;
    store.create(rule_at("p1", start())).await.unwrap();
    let claimed = store.poll("w1").await.unwrap().unwrap();

    clock.advance(chrono::Duration::seconds(61));
    let stolen = store.poll("w2").await.unwrap().unwrap();
    assert_eq!(stolen.id, claimed.id);
    assert_eq!(stolen.worker_id.as_deref(), Some("w2"));
    assert!(stolen.version > claimed.version);
}


#[tokio::test]
async fn test_release_held_after_lost_lease() {
    let (store, clock) = setup(Some(Duration::from_secs(60))).await;
    store.create(rule_at("p1", start())).await.unwrap();
    let claimed = store.poll("w1").await.unwrap().unwrap();

    clock.advance(chrono::Duration::seconds(61));
    store.poll("w2").await.unwrap().unwrap();

    let err = store.release_held(claimed.id, "w1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobAcquisition(_)));
    let held = store.fetch(claimed.id).await.unwrap().unwrap();
    assert_eq!(held.worker_id.as_deref(), Some("w2"));
    assert_eq!(held.status, ScheduledJobRuleStatus::Processing);

    // A tombstoned rule is purged by its holder's release.
    assert!(store.delete(claimed.id).await.unwrap());
    let err = store.release_held(claimed.id, "w2").await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
    assert_eq!(store.reap_expired().await.unwrap().purged, 0);
}

#[tokio::test]
async fn test_reap_reverts_processing_and_purges_tombstones() {
    let (store, clock) = setup(Some(Duration::from_secs(60))).await;
    store.create(rule_at("p1", start())).await.unwrap();
    store.create(rule_at("p1", start())).await.unwrap();
    let abandoned = store.poll("w1").await.unwrap().unwrap();
    let deleted = store.poll("w2").await.unwrap().unwrap();
    assert!(store.delete(deleted.id).await.unwrap());

    clock.advance(chrono::Duration::seconds(61));
    let reaped = store.reap_expired().await.unwrap();
    assert_eq!(reaped, Reaped { released: 1, purged: 1 });

    let reverted = store.fetch(abandoned.id).await.unwrap().unwrap();
    assert_eq!(reverted.status, ScheduledJobRuleStatus::Pending);
    assert!(!reverted.is_locked());
}

#[tokio::test]
async fn test_delete_by_project() {
    let (store, _) = setup(None).await;
    store.create(rule_at("p1", start())).await.unwrap();
    store.create(rule_at("p1", start())).await.unwrap();
    let other = store.create(rule_at("p2", start())).await.unwrap();

    assert_eq!(store.delete_by_project("p1").await.unwrap(), 2);
    assert!(store.list("p1", None, 10).await.unwrap().items.is_empty());
    assert!(store.fetch(other.id).await.unwrap().is_some());
}
