//! Job queue workers.
//!
//! One worker loop per job type, each polling its own slice of the queue
//! with a bounded concurrency budget. Claims go through a conditional
//! update, so at-least-once delivery collapses to single execution; a
//! failing job backs off exponentially and lands in the dead set once
//! its retry budget is spent. The admin surface can push jobs back from
//! either the failed or the dead set.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

use scoreline_core::domain::{Job, JobType};

use crate::config::WorkerConfig;
use crate::pipeline::{Pipeline, PipelineError};
use crate::store::{Store, StoreError};

/// Base delay before the first retry of a failed job.
const BASE_BACKOFF: Duration = Duration::from_secs(30);

/// Retry delays never exceed this, no matter the retry count.
const MAX_BACKOFF: Duration = Duration::from_secs(1800);

/// Executes claimed jobs. The pipeline is the production implementation;
/// tests substitute scripted executors.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<(), PipelineError>;
}

#[async_trait]
impl JobExecutor for Pipeline {
    async fn execute(&self, job: &Job) -> Result<(), PipelineError> {
        self.dispatch(job).await
    }
}

/// Exponential backoff for job retries, capped.
fn backoff_duration(retry_count: u32) -> Duration {
    let delay = BASE_BACKOFF.as_secs().saturating_mul(2u64.saturating_pow(retry_count));
    Duration::from_secs(delay.min(MAX_BACKOFF.as_secs()))
}

/// Per-job-type worker pools over the durable queue.
pub struct JobRunner {
    store: Arc<Store>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
}

impl JobRunner {
    pub fn new(store: Arc<Store>, executor: Arc<dyn JobExecutor>, config: WorkerConfig) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Spawn one polling worker per job type. Workers exit when the
    /// shutdown signal flips to true.
    pub fn spawn_workers(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        JobType::ALL
            .iter()
            .map(|&job_type| {
                let runner = self.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(runner.config.poll_interval);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    tracing::info!(%job_type, "worker started");
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if let Err(e) = runner.drain_once(job_type, Utc::now()).await {
                                    tracing::error!(%job_type, error = %e, "worker poll failed");
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    tracing::info!(%job_type, "worker stopping");
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// One poll cycle: revive backed-off jobs, claim what is due, execute
    /// under the concurrency budget. Returns how many jobs completed.
    pub async fn drain_once(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.store.revive_failed_jobs(now).await?;

        let due = self
            .store
            .due_jobs(job_type, now, (self.config.job_concurrency * 2) as i64)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        // Claim first: under at-least-once delivery another worker may
        // hold some of these already.
        let mut claimed = Vec::new();
        for job in due {
            if self.store.claim_job(&job.id).await? {
                claimed.push(job);
            } else {
                tracing::debug!(job = %job.id, "claim lost, skipping");
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.job_concurrency));
        let results = join_all(claimed.iter().map(|job| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                self.run_job(job).await
            }
        }))
        .await;

        Ok(results.into_iter().filter(|ok| *ok).count())
    }

    async fn run_job(&self, job: &Job) -> bool {
        match self.executor.execute(job).await {
            Ok(()) => {
                if let Err(e) = self.store.complete_job(&job.id).await {
                    tracing::error!(job = %job.id, error = %e, "completion write failed");
                    return false;
                }
                tracing::info!(job = %job.id, "job done");
                true
            }
            Err(e) => {
                let backoff = backoff_duration(job.retry_count);
                let retry_at = Utc::now()
                    + ChronoDuration::from_std(backoff).unwrap_or_else(|_| ChronoDuration::seconds(30));
                match self
                    .store
                    .fail_job(&job.id, &e.to_string(), retry_at, self.config.max_retries)
                    .await
                {
                    Ok(status) => {
                        tracing::warn!(
                            job = %job.id,
                            error = %e,
                            status = status.as_str(),
                            retry_in = ?backoff,
                            "job failed"
                        );
                    }
                    Err(store_err) => {
                        tracing::error!(job = %job.id, error = %store_err, "failure write failed");
                    }
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreline_core::domain::JobStatus;

    struct OkExecutor;

    #[async_trait]
    impl JobExecutor for OkExecutor {
        async fn execute(&self, _job: &Job) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl JobExecutor for FailingExecutor {
        async fn execute(&self, job: &Job) -> Result<(), PipelineError> {
            Err(PipelineError::MatchNotFound(job.match_id.clone()))
        }
    }

    async fn runner(executor: Arc<dyn JobExecutor>, max_retries: u32) -> (JobRunner, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let config = WorkerConfig {
            max_retries,
            ..Default::default()
        };
        (JobRunner::new(store.clone(), executor, config), store)
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_duration(0), Duration::from_secs(30));
        assert_eq!(backoff_duration(1), Duration::from_secs(60));
        assert_eq!(backoff_duration(2), Duration::from_secs(120));
        // Capped, and safe against absurd retry counts.
        assert_eq!(backoff_duration(10), MAX_BACKOFF);
        assert_eq!(backoff_duration(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_due_job_runs_and_completes() {
        let (runner, store) = runner(Arc::new(OkExecutor), 3).await;
        store
            .enqueue_job("analysis:m1", JobType::Analysis, "m1", Utc::now())
            .await
            .unwrap();

        let done = runner.drain_once(JobType::Analysis, Utc::now()).await.unwrap();
        assert_eq!(done, 1);
        let job = store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_future_jobs_are_left_alone() {
        let (runner, store) = runner(Arc::new(OkExecutor), 3).await;
        store
            .enqueue_job(
                "analysis:m1",
                JobType::Analysis,
                "m1",
                Utc::now() + ChronoDuration::hours(1),
            )
            .await
            .unwrap();

        let done = runner.drain_once(JobType::Analysis, Utc::now()).await.unwrap();
        assert_eq!(done, 0);
        let job = store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_worker_only_touches_its_job_type() {
        let (runner, store) = runner(Arc::new(OkExecutor), 3).await;
        store
            .enqueue_job("settlement:m1", JobType::Settlement, "m1", Utc::now())
            .await
            .unwrap();

        let done = runner.drain_once(JobType::Analysis, Utc::now()).await.unwrap();
        assert_eq!(done, 0);
    }

    #[tokio::test]
    async fn test_failed_job_backs_off_then_dies() {
        let (runner, store) = runner(Arc::new(FailingExecutor), 2).await;
        store
            .enqueue_job("analysis:m1", JobType::Analysis, "m1", Utc::now())
            .await
            .unwrap();

        // First attempt fails and backs off into the future.
        runner.drain_once(JobType::Analysis, Utc::now()).await.unwrap();
        let job = store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.execute_at > Utc::now());
        assert!(job.last_error.as_deref().unwrap_or("").contains("m1"));

        // Keep draining past every backoff window until the budget is gone.
        let mut clock = Utc::now();
        for _ in 0..3 {
            clock = clock + ChronoDuration::hours(1);
            runner.drain_once(JobType::Analysis, clock).await.unwrap();
        }
        let job = store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);

        // Dead jobs are not picked up again.
        clock = clock + ChronoDuration::hours(1);
        let done = runner.drain_once(JobType::Analysis, clock).await.unwrap();
        assert_eq!(done, 0);
    }

    #[tokio::test]
    async fn test_pre_claimed_job_is_skipped() {
        let (runner, store) = runner(Arc::new(OkExecutor), 3).await;
        store
            .enqueue_job("analysis:m1", JobType::Analysis, "m1", Utc::now())
            .await
            .unwrap();
        // Another worker got there first.
        assert!(store.claim_job("analysis:m1").await.unwrap());

        let done = runner.drain_once(JobType::Analysis, Utc::now()).await.unwrap();
        assert_eq!(done, 0);
        let job = store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }
}
