//! The job scheduler: admission, priority queues, dispatch, retries,
//! timeouts, cancellation and crash recovery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use clipforge_events::{EventBus, Subscription};
use clipforge_models::{
    BlobId, ErrorKind, Job, JobError, JobId, JobOptions, JobStatus, Principal, QueueClass, Stage,
};
use clipforge_store::{Store, StoreError};

use crate::backoff::retry_delay;
use crate::cancel::CancelRegistry;
use crate::config::SchedulerConfig;
use crate::credits::{debit_best_effort, CreditSink};
use crate::error::{SchedulerError, SchedulerResult};
use crate::runner::{JobContext, JobRunner};

/// A queued job awaiting a worker slot.
#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: JobId,
    principal_id: String,
}

#[derive(Default)]
struct Queues {
    interactive: VecDeque<QueueEntry>,
    batch: VecDeque<QueueEntry>,
}

impl Queues {
    fn queue_mut(&mut self, class: QueueClass) -> &mut VecDeque<QueueEntry> {
        match class {
            QueueClass::Interactive => &mut self.interactive,
            QueueClass::Batch => &mut self.batch,
        }
    }

    fn remove(&mut self, job_id: &JobId) -> bool {
        let before = self.interactive.len() + self.batch.len();
        self.interactive.retain(|e| &e.job_id != job_id);
        self.batch.retain(|e| &e.job_id != job_id);
        before != self.interactive.len() + self.batch.len()
    }
}

struct Inner {
    config: SchedulerConfig,
    store: Store,
    events: Arc<EventBus>,
    runner: Arc<dyn JobRunner>,
    credits: Arc<dyn CreditSink>,
    queues: Mutex<Queues>,
    /// Running job count per principal (reservations included)
    running: Mutex<HashMap<String, u32>>,
    slots: Arc<Semaphore>,
    notify: Notify,
    cancels: CancelRegistry,
    shutdown: watch::Sender<bool>,
}

/// The scheduler handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Store,
        events: Arc<EventBus>,
        runner: Arc<dyn JobRunner>,
        credits: Arc<dyn CreditSink>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                events,
                runner,
                credits,
                queues: Mutex::new(Queues::default()),
                running: Mutex::new(HashMap::new()),
                slots,
                notify: Notify::new(),
                cancels: CancelRegistry::new(),
                shutdown,
            }),
        }
    }

    /// Submit a new job: create the PENDING row and enqueue it.
    pub async fn submit(
        &self,
        principal: &Principal,
        input_blob_id: BlobId,
        options: JobOptions,
    ) -> SchedulerResult<JobId> {
        if !input_blob_id.is_well_formed() {
            return Err(StoreError::invalid("blob id is not a valid content digest").into());
        }
        if !self.inner.store.blobs.exists(&input_blob_id).await? {
            return Err(StoreError::not_found(format!("blob {}", input_blob_id)).into());
        }

        let class = principal.plan.queue_class();
        let job = Job::new(&principal.id, input_blob_id, options);
        self.inner.store.jobs.insert(&job, class).await?;
        // The job holds its own reference on the input blob until deleted.
        self.inner.store.blobs.add_ref(&job.input_blob_id).await?;

        self.inner
            .events
            .publish(&job.id, JobStatus::Pending, None, 0, "Queued");

        self.enqueue(
            QueueEntry {
                job_id: job.id.clone(),
                principal_id: principal.id.clone(),
            },
            class,
        );

        info!(job_id = %job.id, principal = %principal.id, class = %class, "job submitted");
        Ok(job.id)
    }

    /// Cancel a job. PENDING jobs transition immediately; RUNNING jobs are
    /// flagged and transition at the worker's next checkpoint. Cancelling a
    /// terminal job is a no-op.
    pub async fn cancel(&self, job_id: &JobId, principal: &Principal) -> SchedulerResult<()> {
        let job = self.inner.store.jobs.get_owned(job_id, &principal.id).await?;

        if job.status.is_terminal() {
            return Ok(());
        }

        {
            let mut queues = self.inner.queues.lock().expect("queue lock poisoned");
            queues.remove(job_id);
        }

        if self.inner.store.jobs.cancel_pending(job_id).await? {
            self.inner.events.publish(
                job_id,
                JobStatus::Cancelled,
                None,
                job.progress.percent,
                "Cancelled",
            );
            info!(job_id = %job_id, "pending job cancelled");
        } else {
            // Already dispatched; the worker observes the flag at its next
            // checkpoint and writes the terminal state itself.
            self.inner.cancels.request(job_id);
            debug!(job_id = %job_id, "cancellation flagged for running job");
        }

        Ok(())
    }

    /// Current job snapshot for its owner.
    pub async fn status(&self, job_id: &JobId, principal: &Principal) -> SchedulerResult<Job> {
        Ok(self.inner.store.jobs.get_owned(job_id, &principal.id).await?)
    }

    /// Subscribe to a job's progress stream (snapshot + live tail).
    pub async fn subscribe(
        &self,
        job_id: &JobId,
        principal: &Principal,
    ) -> SchedulerResult<Subscription> {
        self.inner.store.jobs.get_owned(job_id, &principal.id).await?;
        Ok(self.inner.events.subscribe(job_id))
    }

    /// Signal the dispatch loop to stop.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Run the dispatch loop. Performs crash recovery, then dispatches until
    /// shutdown is signalled.
    pub async fn run(&self) -> SchedulerResult<()> {
        self.recover().await?;

        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            slots = self.inner.config.worker_concurrency,
            "scheduler dispatch loop started"
        );

        loop {
            self.try_dispatch();

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
                _ = self.inner.notify.notified() => {}
                _ = tick.tick() => {}
            }
        }

        Ok(())
    }

    /// Return RUNNING jobs without a live lease to PENDING (or FAILED when
    /// retries are exhausted or the input is gone), then rebuild the queues
    /// from the PENDING rows.
    async fn recover(&self) -> SchedulerResult<()> {
        let lost = self.inner.store.jobs.running_with_lost_lease().await?;
        for job in lost {
            let input_exists = self.inner.store.blobs.exists(&job.input_blob_id).await?;
            if job.attempts < self.inner.config.max_attempts && input_exists {
                self.inner.store.jobs.recover_to_pending(&job.id).await?;
                warn!(job_id = %job.id, attempts = job.attempts, "recovered orphaned job");
            } else {
                let error = JobError::new(ErrorKind::WorkerLost, "worker lease lost");
                self.inner.store.jobs.fail_lost(&job.id, &error).await?;
                self.inner.events.publish(
                    &job.id,
                    JobStatus::Failed,
                    None,
                    job.progress.percent,
                    &error.message,
                );
                warn!(job_id = %job.id, "orphaned job failed (worker-lost)");
            }
        }

        let pending = self.inner.store.jobs.pending().await?;
        let count = pending.len();
        for (job, class) in pending {
            self.enqueue(
                QueueEntry {
                    principal_id: job.principal_id.clone(),
                    job_id: job.id,
                },
                class,
            );
        }
        if count > 0 {
            info!(count, "requeued pending jobs from store");
        }

        Ok(())
    }

    fn enqueue(&self, entry: QueueEntry, class: QueueClass) {
        {
            let mut queues = self.inner.queues.lock().expect("queue lock poisoned");
            queues.queue_mut(class).push_back(entry);
        }
        self.inner.notify.notify_one();
    }

    /// Dispatch as many queued jobs as free slots and per-principal caps
    /// allow.
    fn try_dispatch(&self) {
        loop {
            let permit = match self.inner.slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let entry = self.pick_next();
            let entry = match entry {
                Some(entry) => entry,
                None => {
                    drop(permit);
                    return;
                }
            };

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute(entry, permit).await;
            });
        }
    }

    /// Pop the next eligible entry: interactive before batch, FIFO within a
    /// class, skipping (but not reordering) entries whose principal is at
    /// its concurrency cap. Reserves a running slot for the chosen entry.
    fn pick_next(&self) -> Option<QueueEntry> {
        let mut queues = self.inner.queues.lock().expect("queue lock poisoned");
        let mut running = self.inner.running.lock().expect("running lock poisoned");
        let cap = self.inner.config.per_principal_concurrency;

        for class in QueueClass::ORDERED {
            let queue = queues.queue_mut(*class);
            let eligible = queue
                .iter()
                .position(|e| running.get(&e.principal_id).copied().unwrap_or(0) < cap);
            if let Some(index) = eligible {
                let entry = queue.remove(index).expect("index in range");
                *running.entry(entry.principal_id.clone()).or_insert(0) += 1;
                return Some(entry);
            }
        }
        None
    }

    fn release_reservation(&self, principal_id: &str) {
        let mut running = self.inner.running.lock().expect("running lock poisoned");
        if let Some(count) = running.get_mut(principal_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(principal_id);
            }
        }
    }

    /// Execute one job attempt on a worker slot.
    async fn execute(
        &self,
        entry: QueueEntry,
        _permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let inner = &self.inner;
        let job_id = entry.job_id.clone();
        let lease = Uuid::new_v4().to_string();

        let job = match inner
            .store
            .jobs
            .mark_running(&job_id, &lease, inner.config.lease_ttl)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                // Typically a job cancelled between enqueue and dispatch
                debug!(job_id = %job_id, error = %e, "skipping dispatch");
                self.release_reservation(&entry.principal_id);
                inner.notify.notify_one();
                return;
            }
        };

        let attempt = job.attempts;
        info!(job_id = %job_id, attempt, "dispatched job");
        inner.events.publish(
            &job_id,
            JobStatus::Running,
            None,
            0,
            format!("Processing started (attempt {})", attempt),
        );

        let cancel_rx = inner.cancels.register(&job_id);

        let heartbeat = {
            let store = inner.store.clone();
            let job_id = job_id.clone();
            let lease = lease.clone();
            let interval = inner.config.heartbeat_interval;
            let ttl = inner.config.lease_ttl;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    match store.jobs.heartbeat(&job_id, &lease, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(job_id = %job_id, "lease no longer held, stopping heartbeat");
                            break;
                        }
                        Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                    }
                }
            })
        };

        let ctx = JobContext::new(
            job.clone(),
            attempt,
            lease.clone(),
            inner.store.clone(),
            Arc::clone(&inner.events),
            cancel_rx,
            inner.config.work_dir.clone(),
            inner.config.default_clip_count,
        );

        let outcome = match tokio::time::timeout(inner.config.job_deadline, inner.runner.run(&ctx))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                // Deadline expiry: flag cancellation so external processes
                // terminate, then classify as a retryable timeout.
                inner.cancels.request(&job_id);
                Err(JobError::timeout(format!(
                    "job exceeded deadline of {}s",
                    inner.config.job_deadline.as_secs()
                )))
            }
        };

        heartbeat.abort();
        self.settle(&job, &lease, outcome).await;

        inner.cancels.remove(&job_id);
        self.release_reservation(&entry.principal_id);
        inner.notify.notify_one();
    }

    /// Write the attempt's outcome to the store and publish the event.
    async fn settle(
        &self,
        job: &Job,
        lease: &str,
        outcome: Result<clipforge_models::JobResults, JobError>,
    ) {
        let inner = &self.inner;
        let job_id = &job.id;
        let attempt = job.attempts;

        match outcome {
            Ok(results) => {
                debit_best_effort(inner.credits.as_ref(), &job.principal_id, results.total_clips)
                    .await;
                match inner.store.jobs.complete(job_id, lease, &results).await {
                    Ok(completed) => {
                        inner.events.publish(
                            job_id,
                            JobStatus::Completed,
                            Some(Stage::Finalize),
                            100,
                            completed.progress.description,
                        );
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "could not record completion");
                    }
                }
            }
            Err(error) if error.kind == ErrorKind::Cancelled => {
                match inner.store.jobs.cancel_running(job_id, lease).await {
                    Ok(true) => {
                        let percent = inner
                            .store
                            .jobs
                            .get(job_id)
                            .await
                            .map(|j| j.progress.percent)
                            .unwrap_or(0);
                        inner.events.publish(
                            job_id,
                            JobStatus::Cancelled,
                            None,
                            percent,
                            "Cancelled",
                        );
                        info!(job_id = %job_id, "running job cancelled");
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, error = %e, "could not record cancellation"),
                }
            }
            Err(error) if error.retryable && attempt < inner.config.max_attempts => {
                let delay = retry_delay(&inner.config, attempt);
                match inner.store.jobs.requeue(job_id, lease, &error.message).await {
                    Ok(_) => {
                        inner.events.publish(
                            job_id,
                            JobStatus::Pending,
                            None,
                            0,
                            format!(
                                "Retrying after {} (attempt {}/{})",
                                error.kind, attempt, inner.config.max_attempts
                            ),
                        );
                        info!(
                            job_id = %job_id,
                            kind = %error.kind,
                            delay_secs = delay.as_secs_f64(),
                            "job re-enqueued with backoff"
                        );
                        self.schedule_requeue(job.clone(), delay);
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "could not requeue job"),
                }
            }
            Err(error) => {
                match inner.store.jobs.fail(job_id, lease, &error).await {
                    Ok(failed) => {
                        inner.events.publish(
                            job_id,
                            JobStatus::Failed,
                            None,
                            failed.progress.percent,
                            &error.message,
                        );
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "could not record failure");
                    }
                }
            }
        }
    }

    /// Re-enqueue a retried job after its backoff delay, unless it was
    /// cancelled in the meantime.
    fn schedule_requeue(&self, job: Job, delay: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            match scheduler.inner.store.jobs.get(&job.id).await {
                Ok(current) if current.status == JobStatus::Pending => {
                    // Class as recorded at submit time
                    let class = scheduler
                        .inner
                        .store
                        .jobs
                        .pending()
                        .await
                        .ok()
                        .and_then(|jobs| {
                            jobs.into_iter()
                                .find(|(j, _)| j.id == job.id)
                                .map(|(_, class)| class)
                        })
                        .unwrap_or(QueueClass::Batch);
                    scheduler.enqueue(
                        QueueEntry {
                            job_id: job.id.clone(),
                            principal_id: job.principal_id.clone(),
                        },
                        class,
                    );
                }
                Ok(_) => debug!(job_id = %job.id, "skipping requeue, job no longer pending"),
                Err(e) => warn!(job_id = %job.id, error = %e, "requeue lookup failed"),
            }
        });
    }
}
