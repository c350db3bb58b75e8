//! Credit decrement hook.
//!
//! Billing is an external collaborator; the scheduler calls this hook once
//! per job, after finalize and before the job is marked completed. Failures
//! are logged and never fail the job.

use async_trait::async_trait;
use tracing::{info, warn};

/// External credit accounting.
#[async_trait]
pub trait CreditSink: Send + Sync {
    /// Debit the principal for the clips a job produced.
    async fn debit(&self, principal_id: &str, clips: u32) -> Result<(), String>;
}

/// Default sink: records the debit in the log only.
pub struct LogCreditSink;

#[async_trait]
impl CreditSink for LogCreditSink {
    async fn debit(&self, principal_id: &str, clips: u32) -> Result<(), String> {
        info!(principal = principal_id, clips, "credit debit");
        Ok(())
    }
}

/// Invoke the hook, logging (not propagating) failures.
pub(crate) async fn debit_best_effort(sink: &dyn CreditSink, principal_id: &str, clips: u32) {
    if let Err(e) = sink.debit(principal_id, clips).await {
        warn!(principal = principal_id, clips, error = %e, "credit debit failed");
    }
}
