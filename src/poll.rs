//! Bounded polling for remote jobs.
//!
//! A job is polled at a fixed interval for at most a fixed number of
//! attempts. The defaults (10s x 60) give roughly a ten minute ceiling per
//! segment. Exhausting the budget yields [`JobStatus::TimedOut`] for that job
//! only; the caller decides what the rest of the run does.

use std::future::Future;
use std::time::Duration;

use crate::stability::{GenerationBackend, GenerationJob, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

impl PollPolicy {
    /// Upper bound on the time spent waiting for one job.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Calls `probe` until it reports something other than pending, sleeping
/// `policy.interval` between attempts.
pub async fn poll_until_settled<F, Fut>(policy: &PollPolicy, mut probe: F) -> JobStatus
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = JobStatus>,
{
    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            JobStatus::Pending => {
                tracing::debug!(attempt, max_attempts = policy.max_attempts, "Job still running");
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            settled => return settled,
        }
    }
    JobStatus::TimedOut
}

/// Drives `job` to a terminal status using the backend's status endpoint.
pub async fn wait_for_job<B>(backend: &B, job: &mut GenerationJob, policy: &PollPolicy)
where
    B: GenerationBackend + ?Sized,
{
    let id = job.id.clone();
    job.status = poll_until_settled(policy, |_| backend.poll_job(&id)).await;
    tracing::debug!(job_id = %job.id, status = job.status.label(), "Job settled");
    match &job.status {
        JobStatus::Ready(bytes) => {
            tracing::info!(job_id = %job.id, bytes = bytes.len(), "Job completed")
        }
        JobStatus::TimedOut => tracing::warn!(
            job_id = %job.id,
            budget_secs = policy.budget().as_secs(),
            "Job did not complete within the polling budget"
        ),
        JobStatus::Failed(detail) => {
            tracing::warn!(job_id = %job.id, detail = %detail, "Job failed")
        }
        JobStatus::Pending => {}
    }
}
