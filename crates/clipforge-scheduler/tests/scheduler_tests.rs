//! Scheduler integration tests using a scripted runner in place of the
//! media pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use clipforge_events::EventBus;
use clipforge_models::{
    BlobId, ErrorKind, JobError, JobId, JobResults, JobStatus, PlanTier, Principal, Stage,
};
use clipforge_scheduler::{
    JobContext, JobRunner, LogCreditSink, Scheduler, SchedulerConfig,
};
use clipforge_store::{Store, StoreConfig};

/// One scripted outcome for a dispatched attempt.
#[derive(Debug, Clone)]
enum Script {
    Succeed { clips: u32 },
    Fail(ErrorKind),
    RunUntilCancelled,
    Hang,
}

/// Test double for the media pipeline. Pops scripted outcomes in dispatch
/// order, falling back to a default outcome, and records dispatch facts the
/// tests assert on.
struct ScriptedRunner {
    script: Mutex<VecDeque<Script>>,
    default: Script,
    /// Minimum simulated work duration for Succeed/Fail outcomes
    work: Duration,
    starts: Mutex<Vec<JobId>>,
    concurrent: Mutex<HashMap<String, u32>>,
    max_concurrent: Mutex<HashMap<String, u32>>,
}

impl ScriptedRunner {
    fn new(default: Script, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default,
            work,
            starts: Mutex::new(Vec::new()),
            concurrent: Mutex::new(HashMap::new()),
            max_concurrent: Mutex::new(HashMap::new()),
        })
    }

    fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }

    fn starts(&self) -> Vec<JobId> {
        self.starts.lock().unwrap().clone()
    }

    fn max_concurrent_for(&self, principal: &str) -> u32 {
        self.max_concurrent
            .lock()
            .unwrap()
            .get(principal)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobResults, JobError> {
        self.starts.lock().unwrap().push(ctx.job.id.clone());
        {
            let mut concurrent = self.concurrent.lock().unwrap();
            let count = concurrent.entry(ctx.job.principal_id.clone()).or_insert(0);
            *count += 1;
            let mut max = self.max_concurrent.lock().unwrap();
            let entry = max.entry(ctx.job.principal_id.clone()).or_insert(0);
            *entry = (*entry).max(*count);
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        let outcome = match step {
            Script::Succeed { clips } => {
                ctx.report(Stage::Probe, 1.0, "Probe complete").await;
                tokio::time::sleep(self.work).await;
                ctx.checkpoint()?;
                ctx.report(Stage::Transcribe, 1.0, "Transcription complete").await;
                ctx.report(Stage::Finalize, 0.5, "Encoding").await;
                Ok(JobResults {
                    total_clips: clips,
                    source_duration: 45.0,
                    artifact_ids: vec![],
                })
            }
            Script::Fail(kind) => {
                ctx.report(Stage::Probe, 1.0, "Probe complete").await;
                tokio::time::sleep(self.work).await;
                Err(JobError::new(kind, "scripted failure"))
            }
            Script::RunUntilCancelled => loop {
                ctx.checkpoint()?;
                ctx.report(Stage::Transcribe, 0.5, "Transcribing audio").await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            },
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(JobError::new(ErrorKind::Internal, "unreachable"))
            }
        };

        {
            let mut concurrent = self.concurrent.lock().unwrap();
            if let Some(count) = concurrent.get_mut(&ctx.job.principal_id) {
                *count -= 1;
            }
        }

        outcome
    }
}

struct Harness {
    _dir: TempDir,
    store: Store,
    scheduler: Scheduler,
    runner: Arc<ScriptedRunner>,
    blob: BlobId,
}

async fn harness(config: SchedulerConfig, runner: Arc<ScriptedRunner>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::rooted_at(dir.path())).await.unwrap();

    // A stored input blob for submissions to reference.
    let src = dir.path().join("input.bin");
    tokio::fs::write(&src, b"not really a video, scheduler never opens it")
        .await
        .unwrap();
    let (blob, _) = store.blobs.store_file(&src, "video/mp4").await.unwrap();

    let mut config = config;
    config.work_dir = dir.path().join("work");
    config.retry_jitter = 0.0;

    let events = Arc::new(EventBus::default());
    let scheduler = Scheduler::new(
        config,
        store.clone(),
        events,
        runner.clone(),
        Arc::new(LogCreditSink),
    );

    let loop_handle = scheduler.clone();
    tokio::spawn(async move { loop_handle.run().await });
    // Let the dispatch loop come up before tests submit.
    tokio::time::sleep(Duration::from_millis(20)).await;

    Harness {
        _dir: dir,
        store,
        scheduler,
        runner,
        blob,
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        worker_concurrency: 2,
        per_principal_concurrency: 2,
        max_attempts: 3,
        retry_base: Duration::from_millis(50),
        retry_factor: 2.0,
        retry_jitter: 0.0,
        job_deadline: Duration::from_secs(30),
        lease_ttl: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(100),
        default_clip_count: 3,
        ..Default::default()
    }
}

fn pro(id: &str) -> Principal {
    Principal::new(id, PlanTier::Pro)
}

fn free(id: &str) -> Principal {
    Principal::new(id, PlanTier::Free)
}

async fn wait_for_status(store: &Store, job_id: &JobId, status: JobStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = store.jobs.get(job_id).await.unwrap();
        if job.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {:?} waiting for {:?}",
            job_id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_completes_with_ordered_events() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 3 }, Duration::from_millis(20));
    let h = harness(fast_config(), runner).await;

    let principal = pro("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();

    let mut sub = h.scheduler.subscribe(&job_id, &principal).await.unwrap();
    let snapshot = sub.snapshot.expect("submit publishes a snapshot");
    assert!(snapshot.seq >= 1);

    if snapshot.status != JobStatus::Completed {
        let mut last_seq = snapshot.seq;
        let mut last_percent = snapshot.percent;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.receiver.recv())
                .await
                .expect("event stream stalled")
                .expect("event stream closed");

            // No gaps after the snapshot, strictly increasing.
            assert_eq!(event.seq, last_seq + 1, "seq gap");
            last_seq = event.seq;

            assert!(
                event.percent >= last_percent,
                "percent regressed within a single attempt"
            );
            last_percent = event.percent;

            if event.status == JobStatus::Completed {
                assert_eq!(event.percent, 100);
                break;
            }
        }
    }

    let job = h.scheduler.status(&job_id, &principal).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.results.unwrap().total_clips, 3);
}

#[tokio::test]
async fn retryable_failure_reenqueues_and_succeeds() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 2 }, Duration::from_millis(10));
    runner.push(Script::Fail(ErrorKind::TransientDependency));
    let h = harness(fast_config(), runner).await;

    let principal = free("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();

    wait_for_status(&h.store, &job_id, JobStatus::Completed).await;

    let job = h.store.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.attempts, 2);
    assert!(job.error.is_none());
    assert_eq!(job.results.unwrap().total_clips, 2);
}

#[tokio::test]
async fn fatal_failure_is_terminal_on_first_attempt() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 1 }, Duration::from_millis(10));
    runner.push(Script::Fail(ErrorKind::Unreadable));
    let h = harness(fast_config(), runner).await;

    let principal = free("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();

    wait_for_status(&h.store, &job_id, JobStatus::Failed).await;

    let job = h.store.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.attempts, 1);
    let error = job.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Unreadable);
    assert!(!error.retryable);
    assert!(job.results.is_none());
}

#[tokio::test]
async fn retries_exhaust_at_max_attempts() {
    let runner = ScriptedRunner::new(
        Script::Fail(ErrorKind::TransientDependency),
        Duration::from_millis(10),
    );
    let mut config = fast_config();
    config.max_attempts = 2;
    let h = harness(config, runner).await;

    let principal = free("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();

    wait_for_status(&h.store, &job_id, JobStatus::Failed).await;

    let job = h.store.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.attempts, 2);
    // The last error is retryable, but attempts are exhausted.
    assert!(job.error.unwrap().retryable);
}

#[tokio::test]
async fn cancel_pending_job_never_dispatches() {
    let runner = ScriptedRunner::new(Script::RunUntilCancelled, Duration::from_millis(10));
    let mut config = fast_config();
    config.worker_concurrency = 1;
    let h = harness(config, runner).await;

    let principal = free("user-1");
    let blocker = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();
    wait_for_status(&h.store, &blocker, JobStatus::Running).await;

    let queued = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();
    h.scheduler.cancel(&queued, &principal).await.unwrap();

    wait_for_status(&h.store, &queued, JobStatus::Cancelled).await;
    let job = h.store.jobs.get(&queued).await.unwrap();
    assert_eq!(job.attempts, 0, "cancelled pending job must not run");

    // Cancel is idempotent.
    h.scheduler.cancel(&queued, &principal).await.unwrap();

    h.scheduler.cancel(&blocker, &principal).await.unwrap();
    wait_for_status(&h.store, &blocker, JobStatus::Cancelled).await;
    assert!(!h.runner.starts().contains(&queued));
}

#[tokio::test]
async fn cancel_running_job_reaches_cancelled_quickly() {
    let runner = ScriptedRunner::new(Script::RunUntilCancelled, Duration::from_millis(10));
    let h = harness(fast_config(), runner).await;

    let principal = free("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();
    wait_for_status(&h.store, &job_id, JobStatus::Running).await;

    let cancelled_at = tokio::time::Instant::now();
    h.scheduler.cancel(&job_id, &principal).await.unwrap();
    wait_for_status(&h.store, &job_id, JobStatus::Cancelled).await;
    assert!(
        cancelled_at.elapsed() < Duration::from_secs(3),
        "cancellation took longer than one check interval allows"
    );

    let job = h.store.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.results.is_none());
    assert!(h.store.artifacts.list_by_job(&job_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn per_principal_cap_is_enforced_but_does_not_starve_others() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 1 }, Duration::from_millis(150));
    let mut config = fast_config();
    config.worker_concurrency = 2;
    config.per_principal_concurrency = 1;
    let h = harness(config, runner).await;

    let alice = free("alice");
    let bob = free("bob");

    let a1 = h.scheduler.submit(&alice, h.blob.clone(), Default::default()).await.unwrap();
    let a2 = h.scheduler.submit(&alice, h.blob.clone(), Default::default()).await.unwrap();
    let b1 = h.scheduler.submit(&bob, h.blob.clone(), Default::default()).await.unwrap();

    for job in [&a1, &a2, &b1] {
        wait_for_status(&h.store, job, JobStatus::Completed).await;
    }

    assert_eq!(h.runner.max_concurrent_for("alice"), 1);
    // Bob's job was not starved behind alice's second job.
    let starts = h.runner.starts();
    let b_pos = starts.iter().position(|j| j == &b1).unwrap();
    assert!(b_pos <= 1, "bob should occupy the second slot immediately");
}

#[tokio::test]
async fn interactive_class_dispatches_before_batch() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 1 }, Duration::from_millis(200));
    let mut config = fast_config();
    config.worker_concurrency = 1;
    let h = harness(config, runner).await;

    let batch_user = free("batcher");
    let pro_user = pro("insider");

    let first = h
        .scheduler
        .submit(&batch_user, h.blob.clone(), Default::default())
        .await
        .unwrap();
    wait_for_status(&h.store, &first, JobStatus::Running).await;

    // Queued while the slot is busy: batch first, interactive second.
    let second_batch = h
        .scheduler
        .submit(&batch_user, h.blob.clone(), Default::default())
        .await
        .unwrap();
    let interactive = h
        .scheduler
        .submit(&pro_user, h.blob.clone(), Default::default())
        .await
        .unwrap();

    for job in [&first, &second_batch, &interactive] {
        wait_for_status(&h.store, job, JobStatus::Completed).await;
    }

    let starts = h.runner.starts();
    let interactive_pos = starts.iter().position(|j| j == &interactive).unwrap();
    let batch_pos = starts.iter().position(|j| j == &second_batch).unwrap();
    assert!(
        interactive_pos < batch_pos,
        "interactive job must dispatch before the queued batch job"
    );
}

#[tokio::test]
async fn job_deadline_times_out_and_exhausts() {
    let runner = ScriptedRunner::new(Script::Hang, Duration::from_millis(10));
    let mut config = fast_config();
    config.job_deadline = Duration::from_millis(200);
    config.max_attempts = 1;
    let h = harness(config, runner).await;

    let principal = free("user-1");
    let job_id = h
        .scheduler
        .submit(&principal, h.blob.clone(), Default::default())
        .await
        .unwrap();

    wait_for_status(&h.store, &job_id, JobStatus::Failed).await;
    let job = h.store.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.error.unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn submit_unknown_blob_is_rejected() {
    let runner = ScriptedRunner::new(Script::Succeed { clips: 1 }, Duration::from_millis(10));
    let h = harness(fast_config(), runner).await;

    let missing = BlobId::from_hex("ef".repeat(32));
    let err = h
        .scheduler
        .submit(&free("user-1"), missing, Default::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Not found"));

    let malformed = BlobId::from_hex("zz");
    let err = h
        .scheduler
        .submit(&free("user-1"), malformed, Default::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid parameters"));
}

#[tokio::test]
async fn startup_recovery_requeues_orphaned_running_job() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::rooted_at(dir.path())).await.unwrap();

    let src = dir.path().join("input.bin");
    tokio::fs::write(&src, b"payload").await.unwrap();
    let (blob, _) = store.blobs.store_file(&src, "video/mp4").await.unwrap();

    // A job that was mid-flight when the previous process died.
    let job = clipforge_models::Job::new("user-1", blob, Default::default());
    store
        .jobs
        .insert(&job, clipforge_models::QueueClass::Batch)
        .await
        .unwrap();
    store
        .jobs
        .mark_running(&job.id, "dead-lease", Duration::from_secs(0))
        .await
        .unwrap();

    let runner = ScriptedRunner::new(Script::Succeed { clips: 1 }, Duration::from_millis(10));
    let mut config = fast_config();
    config.work_dir = dir.path().join("work");
    let scheduler = Scheduler::new(
        config,
        store.clone(),
        Arc::new(EventBus::default()),
        runner,
        Arc::new(LogCreditSink),
    );
    let loop_handle = scheduler.clone();
    tokio::spawn(async move { loop_handle.run().await });

    wait_for_status(&store, &job.id, JobStatus::Completed).await;
    let recovered = store.jobs.get(&job.id).await.unwrap();
    assert_eq!(recovered.attempts, 2);
}
