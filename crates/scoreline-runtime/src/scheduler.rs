//! Kickoff-relative job scheduling.
//!
//! Every match gets a deterministic set of jobs at named offsets from
//! kickoff: analysis well ahead, predictions shortly before, a late
//! retry slot for stragglers. Job ids derive from (type, match), so a
//! scheduling pass is safe to repeat: after a crash, a deploy, or a
//! fixture refresh, re-running it is a no-op for everything already
//! enqueued.
//!
//! Two rules here are load-bearing for catch-up after downtime:
//! eligibility gates on match *status*, never on "kickoff already
//! passed"; and an execution time in the past schedules the job for
//! immediate execution instead of dropping it. Recoverability beats
//! strict timing.

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;

use scoreline_core::domain::{job_id, JobType, Match};

use crate::config::ScheduleConfig;
use crate::store::{Store, StoreError};

/// Errors from scheduling. These are never swallowed: a missed schedule
/// call means a match never gets predictions.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to enqueue {job_id} after retries: {source}")]
    Enqueue {
        job_id: String,
        #[source]
        source: StoreError,
    },
}

/// Kickoff-relative scheduler.
pub struct Scheduler {
    store: Arc<Store>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, config: ScheduleConfig) -> Self {
        Self { store, config }
    }

    /// Enqueue the standard pre-kickoff job set for a match. Returns the
    /// ids of jobs newly enqueued by this call (already-known ids are
    /// silent no-ops).
    pub async fn schedule_match(
        &self,
        m: &Match,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, SchedulerError> {
        if !m.status.accepts_jobs() {
            tracing::debug!(match_id = %m.id, status = %m.status, "match not eligible for scheduling");
            return Ok(Vec::new());
        }

        let plan = [
            (JobType::Analysis, self.config.analysis_offset, None),
            (JobType::Predictions, self.config.predictions_offset, None),
            (
                JobType::Predictions,
                self.config.predictions_retry_offset,
                Some("retry"),
            ),
            // First live poll at kickoff; the job chains itself while live.
            (JobType::LiveMonitor, std::time::Duration::ZERO, Some("0")),
        ];

        let mut enqueued = Vec::new();
        for (job_type, offset, suffix) in plan {
            let offset = ChronoDuration::from_std(offset).unwrap_or_else(|_| ChronoDuration::zero());
            // Past-due slots run immediately; a match is never silently
            // dropped because the scheduler was down at the right moment.
            let execute_at = (m.kickoff - offset).max(now);
            let id = job_id(job_type, &m.id, suffix);

            if self.enqueue_with_retry(&id, job_type, &m.id, execute_at).await? {
                tracing::info!(job = %id, at = %execute_at, "job scheduled");
                enqueued.push(id);
            }
        }
        Ok(enqueued)
    }

    /// Enqueue the next live-monitor poll for a match.
    pub async fn schedule_live_monitor(
        &self,
        match_id: &str,
        sequence: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<String>, SchedulerError> {
        let id = job_id(JobType::LiveMonitor, match_id, Some(&sequence.to_string()));
        let inserted = self
            .enqueue_with_retry(&id, JobType::LiveMonitor, match_id, at)
            .await?;
        Ok(inserted.then_some(id))
    }

    /// Enqueue settlement for a finished match, for immediate execution.
    pub async fn schedule_settlement(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, SchedulerError> {
        let id = job_id(JobType::Settlement, match_id, None);
        let inserted = self
            .enqueue_with_retry(&id, JobType::Settlement, match_id, now)
            .await?;
        Ok(inserted.then_some(id))
    }

    pub fn live_monitor_interval(&self) -> std::time::Duration {
        self.config.live_monitor_interval
    }

    /// Enqueue with exponential backoff. Queue unavailability is retried
    /// here; exhausting the retries surfaces the error to the caller,
    /// which alerts, since a stuck scheduler silently degrades everything
    /// downstream of it.
    async fn enqueue_with_retry(
        &self,
        id: &str,
        job_type: JobType,
        match_id: &str,
        execute_at: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        (|| async { self.store.enqueue_job(id, job_type, match_id, execute_at).await })
            .retry(ExponentialBuilder::default())
            .notify(|err: &StoreError, after| {
                tracing::warn!(job = id, error = %err, retry_in = ?after, "enqueue failed, retrying");
            })
            .await
            .map_err(|source| SchedulerError::Enqueue {
                job_id: id.to_string(),
                source,
            })
    }
}
