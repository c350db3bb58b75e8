//! The event bus implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use clipforge_models::{JobId, JobStatus, ProgressEvent, Stage};

/// Default capacity of the per-job event ring.
pub const DEFAULT_RING_SIZE: usize = 128;

/// A live subscription to one job's events.
pub struct Subscription {
    /// Latest event at subscribe time, if any was ever published
    pub snapshot: Option<ProgressEvent>,
    /// Live tail; `RecvError::Lagged` means the subscriber fell behind
    pub receiver: broadcast::Receiver<ProgressEvent>,
}

struct JobChannel {
    ring: VecDeque<ProgressEvent>,
    next_seq: u64,
    tx: broadcast::Sender<ProgressEvent>,
}

impl JobChannel {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            ring: VecDeque::with_capacity(capacity),
            next_seq: 1,
            tx,
        }
    }
}

/// Per-job fan-out of progress events.
///
/// One write path per job (the worker or the scheduler), many readers.
pub struct EventBus {
    channels: Mutex<HashMap<JobId, JobChannel>>,
    ring_size: usize,
}

impl EventBus {
    /// Create a bus with the given per-job ring capacity.
    pub fn new(ring_size: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            ring_size: ring_size.max(1),
        }
    }

    /// Publish a progress event for a job, assigning the next sequence number.
    ///
    /// Returns the published event. Delivery to subscribers is best-effort;
    /// the ring always retains the most recent entries.
    pub fn publish(
        &self,
        job_id: &JobId,
        status: JobStatus,
        phase: Option<Stage>,
        percent: u8,
        description: impl Into<String>,
    ) -> ProgressEvent {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        let ring_size = self.ring_size;
        let channel = channels
            .entry(job_id.clone())
            .or_insert_with(|| JobChannel::new(ring_size));

        let event = ProgressEvent::new(
            channel.next_seq,
            job_id.clone(),
            status,
            phase,
            percent,
            description,
        );
        channel.next_seq += 1;

        if channel.ring.len() == ring_size {
            channel.ring.pop_front();
        }
        channel.ring.push_back(event.clone());

        // Err just means no live subscribers
        let delivered = channel.tx.send(event.clone()).unwrap_or(0);
        debug!(
            job_id = %job_id,
            seq = event.seq,
            percent = event.percent,
            subscribers = delivered,
            "published progress event"
        );

        event
    }

    /// Subscribe to a job's stream: latest snapshot plus live tail.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        let ring_size = self.ring_size;
        let channel = channels
            .entry(job_id.clone())
            .or_insert_with(|| JobChannel::new(ring_size));

        Subscription {
            snapshot: channel.ring.back().cloned(),
            receiver: channel.tx.subscribe(),
        }
    }

    /// Recent events for a job with `seq` greater than `after`.
    pub fn history_after(&self, job_id: &JobId, after: u64) -> Vec<ProgressEvent> {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        channels
            .get(job_id)
            .map(|c| c.ring.iter().filter(|e| e.seq > after).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a job's channel. Called when a job is deleted.
    pub fn remove(&self, job_id: &JobId) {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels.remove(job_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_RING_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_n(bus: &EventBus, job_id: &JobId, n: u64) {
        for i in 0..n {
            bus.publish(
                job_id,
                JobStatus::Running,
                Some(Stage::Transcribe),
                (i % 100) as u8,
                format!("step {}", i),
            );
        }
    }

    #[test]
    fn seq_is_strictly_increasing() {
        let bus = EventBus::default();
        let job = JobId::new();

        let a = bus.publish(&job, JobStatus::Pending, None, 0, "queued");
        let b = bus.publish(&job, JobStatus::Running, Some(Stage::Probe), 2, "probing");
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn seq_is_per_job() {
        let bus = EventBus::default();
        let job_a = JobId::new();
        let job_b = JobId::new();

        bus.publish(&job_a, JobStatus::Pending, None, 0, "a");
        let first_b = bus.publish(&job_b, JobStatus::Pending, None, 0, "b");
        assert_eq!(first_b.seq, 1);
    }

    #[test]
    fn ring_is_bounded() {
        let bus = EventBus::new(4);
        let job = JobId::new();
        publish_n(&bus, &job, 10);

        let history = bus.history_after(&job, 0);
        assert_eq!(history.len(), 4);
        assert_eq!(history.first().unwrap().seq, 7);
        assert_eq!(history.last().unwrap().seq, 10);
    }

    #[tokio::test]
    async fn snapshot_then_tail() {
        let bus = EventBus::default();
        let job = JobId::new();

        bus.publish(&job, JobStatus::Pending, None, 0, "queued");
        bus.publish(&job, JobStatus::Running, Some(Stage::Probe), 3, "probing");

        let mut sub = bus.subscribe(&job);
        let snapshot = sub.snapshot.expect("snapshot expected");
        assert_eq!(snapshot.seq, 2);

        bus.publish(&job, JobStatus::Running, Some(Stage::ExtractAudio), 7, "audio");
        let live = sub.receiver.recv().await.unwrap();
        assert_eq!(live.seq, 3);
    }

    #[tokio::test]
    async fn subscriber_before_any_event_has_no_snapshot() {
        let bus = EventBus::default();
        let job = JobId::new();

        let mut sub = bus.subscribe(&job);
        assert!(sub.snapshot.is_none());

        bus.publish(&job, JobStatus::Pending, None, 0, "queued");
        let live = sub.receiver.recv().await.unwrap();
        assert_eq!(live.seq, 1);
    }

    #[tokio::test]
    async fn lagged_subscriber_observes_gap() {
        let bus = EventBus::new(4);
        let job = JobId::new();

        let mut sub = bus.subscribe(&job);
        publish_n(&bus, &job, 20);

        match sub.receiver.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("expected lag, got {:?}", other.map(|e| e.seq)),
        }
    }

    #[test]
    fn history_after_filters_by_seq() {
        let bus = EventBus::default();
        let job = JobId::new();
        publish_n(&bus, &job, 5);

        let tail = bus.history_after(&job, 3);
        let seqs: Vec<_> = tail.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }
}
