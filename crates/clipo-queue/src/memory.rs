//! In-process job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, Redelivery};
use clipo_models::{Job, JobId};

/// A job that will not be delivered again.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

impl DeadLetter {
    fn new(job: Job, reason: impl Into<String>) -> Self {
        Self {
            job,
            reason: reason.into(),
            dead_at: Utc::now(),
        }
    }
}

struct Lease {
    job: Job,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Job>,
    /// Sorted by due time.
    delayed: Vec<(Instant, Job)>,
    inflight: HashMap<JobId, Lease>,
    dead_letters: Vec<DeadLetter>,
}

impl State {
    fn schedule(&mut self, due: Instant, job: Job) {
        let pos = self.delayed.partition_point(|(at, _)| *at <= due);
        self.delayed.insert(pos, (due, job));
    }

    fn promote_due(&mut self, now: Instant) {
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        let jobs: Vec<_> = self.delayed.drain(..due).map(|(_, job)| job).collect();
        self.ready.extend(jobs);
    }

    fn reap_expired(&mut self, now: Instant, max_retries: u32) {
        let expired: Vec<JobId> = self
            .inflight
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in expired {
            let Some(lease) = self.inflight.remove(&job_id) else {
                continue;
            };
            let next = lease.job.next_attempt();
            if next.attempt_count >= max_retries {
                warn!(job_id = %job_id, "Lease expired on final attempt, moving job to DLQ");
                self.dead_letters
                    .push(DeadLetter::new(next, "lease expired after final attempt"));
            } else {
                warn!(
                    job_id = %job_id,
                    attempt_count = next.attempt_count,
                    "Lease expired, redelivering job"
                );
                self.ready.push_back(next);
            }
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        let delayed = self.delayed.first().map(|(at, _)| *at);
        let lease = self.inflight.values().map(|l| l.expires_at).min();
        match (delayed, lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Job queue held in process memory.
///
/// Delays and leases run on `tokio::time`, so paused-clock tests can drive
/// minutes of backoff instantly.
pub struct MemoryJobQueue {
    state: Mutex<State>,
    notify: Notify,
    max_retries: u32,
    visibility_timeout: Duration,
}

impl MemoryJobQueue {
    pub fn new(max_retries: u32, visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_retries: max_retries.max(1),
            visibility_timeout,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_retries, config.visibility_timeout)
    }

    /// Snapshot of dead-lettered jobs, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.clone()
    }

    /// Number of jobs currently leased to a worker.
    pub fn in_flight(&self) -> usize {
        self.state.lock().inflight.len()
    }

    /// Lease the next deliverable job, or say when to look again.
    fn poll(&self) -> Result<Job, Option<Instant>> {
        let now = Instant::now();
        let mut state = self.state.lock();

        state.reap_expired(now, self.max_retries);
        state.promote_due(now);

        match state.ready.pop_front() {
            Some(job) => {
                state.inflight.insert(
                    job.job_id.clone(),
                    Lease {
                        job: job.clone(),
                        expires_at: now + self.visibility_timeout,
                    },
                );
                Ok(job)
            }
            None => Err(state.next_wakeup()),
        }
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> QueueResult<()> {
        debug!(job_id = %job.job_id, "Enqueued job");
        self.state.lock().ready.push_back(job);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll() {
                Ok(job) => {
                    debug!(job_id = %job.job_id, attempt = job.attempt(), "Dequeued job");
                    return Ok(job);
                }
                Err(Some(wake_at)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }

    async fn ack(&self, job_id: &JobId) -> QueueResult<()> {
        if self.state.lock().inflight.remove(job_id).is_some() {
            debug!(job_id = %job_id, "Acknowledged job");
        }
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, delay: Duration) -> QueueResult<Redelivery> {
        let attempt_count = {
            let mut state = self.state.lock();
            let lease = state
                .inflight
                .remove(job_id)
                .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;

            let next = lease.job.next_attempt();
            let attempts = next.attempt_count;
            if attempts >= self.max_retries {
                warn!(job_id = %job_id, attempts, "Moved job to DLQ: retries exhausted");
                state.dead_letters.push(DeadLetter::new(
                    next,
                    format!("retries exhausted after {} attempts", attempts),
                ));
                return Err(QueueError::RetryExhausted {
                    job_id: job_id.to_string(),
                    attempts,
                });
            }

            state.schedule(Instant::now() + delay, next);
            attempts
        };

        self.notify.notify_waiters();
        debug!(job_id = %job_id, attempt_count, ?delay, "Scheduled redelivery");
        Ok(Redelivery {
            attempt_count,
            delay,
        })
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<()> {
        {
            let mut state = self.state.lock();
            let lease = state
                .inflight
                .remove(job_id)
                .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;
            state.ready.push_front(lease.job);
        }

        self.notify.notify_waiters();
        debug!(job_id = %job_id, "Released job");
        Ok(())
    }

    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock();
        let lease = state
            .inflight
            .get_mut(job_id)
            .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;
        lease.expires_at = Instant::now() + self.visibility_timeout;
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        let state = self.state.lock();
        Ok(state.ready.len() + state.delayed.len() + state.inflight.len())
    }

    async fn dead_letter_len(&self) -> QueueResult<usize> {
        Ok(self.state.lock().dead_letters.len())
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
