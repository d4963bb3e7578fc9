use super::*;
use async_trait::async_trait;
use cadence_core::{JobReason, ManualClock, NewJob};
use cadence_store::{Database, QuotaKind, QuotaStore, SqliteJobStore, SqliteQuotaStore};
use chrono::TimeZone;
use crate::handler::EchoHandler;
use crate::test_support::{eventually, SlowJobStore};

/// Counts calls and optionally fails or stalls.
#[derive(Default)]
struct ScriptedHandler {
    calls: AtomicU64,
    fail: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(WorkerError::Handler(format!("cannot handle {}", job.input)));
        }
        Ok(json!({ "ok": true }))
    }
}

/// Lets the lease run out mid-job and has `w2` take the job over.
struct LeaseThief {
    clock: Arc<ManualClock>,
    jobs: SqliteJobStore,
}

#[async_trait]
impl JobHandler for LeaseThief {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, WorkerError> {
        self.clock.advance(chrono::Duration::seconds(31));
        let stolen = self.jobs.poll("w2").await?;
        assert_eq!(stolen.map(|j| j.id), Some(job.id));
        Ok(json!({ "ok": true }))
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    jobs: SqliteJobStore,
    quotas: SqliteQuotaStore,
}

impl Fixture {
    async fn new(lease: Option<Duration>) -> Self {
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let db = Database::in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone())
            .with_lease(lease);
        Self {
            clock,
            jobs: SqliteJobStore::new(db.clone()),
            quotas: SqliteQuotaStore::new(db),
        }
    }

    fn worker(&self, handler: Arc<dyn JobHandler>) -> JobWorker {
        self.worker_on(Arc::new(self.jobs.clone()), handler)
    }

    fn worker_on(&self, jobs: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>) -> JobWorker {
        JobWorker::new(
            "w1",
            jobs,
            QuotaGate::new(Arc::new(self.quotas.clone())),
            handler,
        )
    }

    async fn enqueue(&self, project: &str, input: serde_json::Value) -> Job {
        self.jobs
            .create(NewJob::new(project, JobReason::Api, input))
            .await
            .unwrap()
    }

    async fn claim(&self) -> Job {
        self.jobs.poll("w1").await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_process_completes_and_releases() {
    let f = Fixture::new(None).await;
    let worker = f.worker(Arc::new(EchoHandler));
    f.enqueue("p1", json!({ "x": 1 })).await;

    let done = worker.process(f.claim().await).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.output, Some(json!({ "echo": { "x": 1 } })));
    assert!(!done.is_locked());
    assert_eq!(worker.stats().completed(), 1);
    assert_eq!(worker.stats().failed(), 0);

    assert!(f.jobs.poll("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_handler_error_fails_the_job() {
    let f = Fixture::new(None).await;
    let handler = Arc::new(ScriptedHandler {
        fail: true,
        ..Default::default()
    });
    let worker = f.worker(handler.clone());
    f.enqueue("p1", json!("bad")).await;

    let done = worker.process(f.claim().await).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.output, Some(json!({ "error": "Handler error: cannot handle \"bad\"" })));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(worker.stats().failed(), 1);
}

#[tokio::test]
async fn test_exhausted_run_quota_fails_without_running() {
    let f = Fixture::new(None).await;
    f.quotas.set_quota("p1", QuotaKind::RunJob, 1).await.unwrap();
    let handler = Arc::new(ScriptedHandler::default());
    let worker = f.worker(handler.clone());

    f.enqueue("p1", json!(1)).await;
    let first = worker.process(f.claim().await).await.unwrap();
    assert_eq!(first.status, JobStatus::Completed);

    f.enqueue("p1", json!(2)).await;
    let second = worker.process(f.claim().await).await.unwrap();
    assert_eq!(second.status, JobStatus::Failed);
    let message = second.output.unwrap()["error"].as_str().unwrap().to_string();
    assert!(message.contains("quota"), "{}", message);

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.quotas.remaining("p1", QuotaKind::RunJob).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_heartbeat_keeps_version_current() {
    let f = Fixture::new(Some(Duration::from_secs(30))).await;
    let handler = Arc::new(ScriptedHandler {
        delay: Some(Duration::from_millis(120)),
        ..Default::default()
    });
    let worker = f
        .worker(handler)
        .with_heartbeat(Some(Duration::from_millis(20)));
    f.enqueue("p1", json!({})).await;

    let claimed = f.claim().await;
    let done = worker.process(claimed.clone()).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    // poll, at least one beat, update, release
    assert!(done.version >= claimed.version + 3, "version {}", done.version);
}

#[tokio::test]
async fn test_run_once_and_drain() {
    let f = Fixture::new(None).await;
    let worker = f.worker(Arc::new(EchoHandler)).with_concurrency(2);
    assert!(!worker.run_once().await.unwrap());

    for i in 0..3 {
        f.enqueue("p1", json!(i)).await;
    }
    for _ in 0..3 {
        assert!(worker.run_once().await.unwrap());
    }
    assert!(!worker.run_once().await.unwrap());

    worker.drain().await.unwrap();
    assert_eq!(worker.stats().completed(), 3);
    assert_eq!(worker.available_slots(), 2);

    let page = f.jobs.list("p1", None, 10).await.unwrap();
    assert!(page.items.iter().all(|job| job.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let f = Fixture::new(None).await;
    let worker = f
        .worker(Arc::new(EchoHandler))
        .with_poll_interval(Duration::from_millis(5));
    let job = f.enqueue("p1", json!({})).await;

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(worker.clone().run(rx));

    for _ in 0..200 {
        if worker.stats().completed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tx.send(()).unwrap();
    handle.await.unwrap();

    let job = f.jobs.fetch(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.is_locked());
}

#[tokio::test]
async fn test_lost_lease_leaves_the_new_holder_alone() {
    let f = Fixture::new(Some(Duration::from_secs(30))).await;
    let worker = f.worker(Arc::new(LeaseThief {
        clock: f.clock.clone(),
        jobs: f.jobs.clone(),
    }));
    let job = f.enqueue("p1", json!({})).await;

    let err = worker.process(f.claim().await).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Scheduler(SchedulerError::VersionConflict { .. })
    ));

    let held = f.jobs.fetch(job.id).await.unwrap().unwrap();
    assert_eq!(held.worker_id.as_deref(), Some("w2"));
    assert_eq!(held.status, JobStatus::Running);
    assert!(held.output.is_none());
    assert!(f.jobs.poll("w3").await.unwrap().is_none());
    assert_eq!(worker.stats().completed(), 0);
    assert_eq!(worker.stats().failed(), 0);
}

#[tokio::test]
async fn test_shutdown_during_poll_still_runs_the_claimed_job() {
    let f = Fixture::new(None).await;
    let mut slow = SlowJobStore::new(f.jobs.clone());
    slow.poll_delay = Duration::from_millis(100);
    let worker = f
        .worker_on(Arc::new(slow), Arc::new(EchoHandler))
        .with_poll_interval(Duration::from_millis(5));
    let job = f.enqueue("p1", json!({})).await;

    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(worker.clone().run(rx));

    let jobs = f.jobs.clone();
    eventually(|| {
        let jobs = jobs.clone();
        async move { jobs.fetch(job.id).await.unwrap().unwrap().is_locked() }
    })
    .await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    let job = f.jobs.fetch(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.is_locked());
    assert_eq!(worker.stats().completed(), 1);
}
