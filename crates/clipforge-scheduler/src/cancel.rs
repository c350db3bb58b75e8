//! Cooperative cancellation registry.
//!
//! One watch channel per in-flight job. `cancel` flips the flag; workers
//! observe it at checkpoints between stages and inside long FFmpeg runs.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use clipforge_models::JobId;

/// Registry of cancel flags keyed by job id.
#[derive(Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag for a job. Returns the receiver the worker watches.
    pub fn register(&self, job_id: &JobId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let mut flags = self.flags.lock().expect("cancel registry lock poisoned");
        flags.insert(job_id.as_str().to_string(), tx);
        rx
    }

    /// Request cancellation. Returns true when the job had a live flag.
    pub fn request(&self, job_id: &JobId) -> bool {
        let flags = self.flags.lock().expect("cancel registry lock poisoned");
        match flags.get(job_id.as_str()) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Remove a job's flag after it finishes.
    pub fn remove(&self, job_id: &JobId) {
        let mut flags = self.flags.lock().expect("cancel registry lock poisoned");
        flags.remove(job_id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_flips_registered_flag() {
        let registry = CancelRegistry::new();
        let job = JobId::new();

        let rx = registry.register(&job);
        assert!(!*rx.borrow());

        assert!(registry.request(&job));
        assert!(*rx.borrow());
    }

    #[test]
    fn request_unknown_job_is_false() {
        let registry = CancelRegistry::new();
        assert!(!registry.request(&JobId::new()));
    }

    #[test]
    fn remove_clears_flag() {
        let registry = CancelRegistry::new();
        let job = JobId::new();
        let _rx = registry.register(&job);

        registry.remove(&job);
        assert!(!registry.request(&job));
    }
}
