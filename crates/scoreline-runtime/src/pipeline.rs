//! Pipeline coordination: fixtures → analysis → predictions → live
//! monitoring → settlement → cache invalidation.
//!
//! The coordinator owns no state of its own; it wires the store, the
//! provider registry, the resilience stack, and the settlement engine
//! into job handlers. Per-model failures are contained here: a model
//! that times out, blows its budget, or returns garbage costs the match
//! one participant, never the whole job.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use scoreline_core::domain::{Job, JobType, Match, MatchStatus, ModelEntry, Prediction};
use scoreline_core::PredictionFailure;

use crate::config::RuntimeConfig;
use crate::invalidation::InvalidationBus;
use crate::prompts;
use crate::providers::{ModelProvider, ProviderRegistry, ProviderReply, ScoreProvider};
use crate::resilience::{BudgetEnforcer, BudgetError, CircuitBreaker, FallbackOrchestrator};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::settlement::{SettlementEngine, SettlementError, SettlementOutcome};
use crate::store::{Store, StoreError};

/// Errors surfaced to the job queue.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("scheduling error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("match '{0}' not found")]
    MatchNotFound(String),

    #[error("analysis for '{match_id}' failed: {failure}")]
    Analysis {
        match_id: String,
        failure: PredictionFailure,
    },
}

/// The pipeline coordinator.
pub struct Pipeline {
    store: Arc<Store>,
    registry: Arc<ProviderRegistry>,
    circuit: Arc<CircuitBreaker>,
    budget: Arc<BudgetEnforcer>,
    fallback: Arc<FallbackOrchestrator>,
    settlement: Arc<SettlementEngine>,
    scheduler: Arc<Scheduler>,
    bus: Arc<InvalidationBus>,
    config: Arc<RuntimeConfig>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ProviderRegistry>,
        circuit: Arc<CircuitBreaker>,
        budget: Arc<BudgetEnforcer>,
        fallback: Arc<FallbackOrchestrator>,
        settlement: Arc<SettlementEngine>,
        scheduler: Arc<Scheduler>,
        bus: Arc<InvalidationBus>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            circuit,
            budget,
            fallback,
            settlement,
            scheduler,
            bus,
            config,
        }
    }

    /// Register a fixture and schedule its job set. Called by fixture
    /// ingestion and by catch-up passes on restart; both are safe to
    /// repeat.
    pub async fn ingest_fixture(&self, m: &Match) -> Result<Vec<String>, PipelineError> {
        self.store.upsert_match(m).await?;
        Ok(self.scheduler.schedule_match(m, Utc::now()).await?)
    }

    /// Re-run scheduling for every match that still accepts jobs.
    ///
    /// Called once at daemon startup: any slot that should have fired
    /// while the process was down gets enqueued for immediate execution
    /// instead of being lost. Idempotent ids make this free when nothing
    /// was missed.
    pub async fn catch_up(&self) -> Result<usize, PipelineError> {
        let now = Utc::now();
        let mut enqueued = 0usize;
        for m in self.store.matches_accepting_jobs().await? {
            enqueued += self.scheduler.schedule_match(&m, now).await?.len();
        }
        if enqueued > 0 {
            tracing::info!(enqueued, "catch-up pass scheduled missed jobs");
        }
        Ok(enqueued)
    }

    /// Execute one claimed job.
    pub async fn dispatch(&self, job: &Job) -> Result<(), PipelineError> {
        tracing::debug!(job = %job.id, job_type = %job.job_type, "dispatching");
        match job.job_type {
            JobType::Analysis => self.run_analysis(&job.match_id).await,
            JobType::Predictions => self.run_predictions(&job.match_id).await,
            JobType::LiveMonitor => self.run_live_monitor(job).await,
            JobType::Settlement => self.run_settlement(&job.match_id).await,
            JobType::Backfill => self.run_backfill(&job.match_id).await,
        }
    }

    // -----------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------

    /// Produce the pre-match brief later prediction prompts embed.
    async fn run_analysis(&self, match_id: &str) -> Result<(), PipelineError> {
        let m = self.require_match(match_id).await?;
        if !m.status.accepts_jobs() {
            tracing::debug!(match_id, status = %m.status, "skipping analysis for settled match");
            return Ok(());
        }

        // The first eligible model writes the brief; there is no need for
        // every model's view of the same fixture.
        let eligible = self.eligible_models().await?;
        let Some((analyst, _)) = eligible.first() else {
            return Err(PipelineError::Analysis {
                match_id: match_id.to_string(),
                failure: PredictionFailure::Api {
                    status: 0,
                    message: "no eligible model for analysis".to_string(),
                },
            });
        };

        let provider = self
            .registry
            .resolve(&analyst.id)
            .map_err(|e| PipelineError::Analysis {
                match_id: match_id.to_string(),
                failure: e.classify(),
            })?;

        let brief = self
            .gated_raw_call(&provider, &prompts::analysis_prompt(&m))
            .await
            .map_err(|failure| PipelineError::Analysis {
                match_id: match_id.to_string(),
                failure,
            })?;

        self.store.save_analysis(match_id, &brief).await?;
        tracing::info!(match_id, analyst = %analyst.id, "analysis brief stored");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Predictions
    // -----------------------------------------------------------------

    /// Fan predictions out over every eligible model that has not yet
    /// answered for this match. Both the main pass and the late retry
    /// pass go through here: the "already answered" filter is what makes
    /// re-execution and retries produce no duplicates.
    async fn run_predictions(&self, match_id: &str) -> Result<(), PipelineError> {
        let m = self.require_match(match_id).await?;
        if !m.status.accepts_jobs() {
            tracing::debug!(match_id, status = %m.status, "skipping predictions for settled match");
            return Ok(());
        }

        let analysis = self.store.get_analysis(match_id).await?;
        let answered: std::collections::HashSet<String> = self
            .store
            .predictions_for_match(match_id)
            .await?
            .into_iter()
            .map(|p| p.model_id)
            .collect();

        let candidates: Vec<(ModelEntry, bool)> = self
            .eligible_models()
            .await?
            .into_iter()
            .filter(|(entry, _)| !answered.contains(&entry.id))
            .collect();

        if candidates.is_empty() {
            tracing::debug!(match_id, "no models left to ask");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers.prediction_concurrency));
        let analysis = analysis.as_deref();
        let m = &m;
        let tasks = candidates.iter().map(|(entry, is_probe)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let result = self.predict_with_one_model(m, entry, analysis).await;
                (entry, *is_probe, result)
            }
        });

        let mut stored = 0usize;
        for (entry, is_probe, result) in join_all(tasks).await {
            match result {
                Ok(()) => {
                    stored += 1;
                    if is_probe {
                        tracing::info!(model = %entry.id, "probe succeeded, model back in rotation");
                    }
                }
                Err(failure) => {
                    // One model down is one fewer row on the match page,
                    // never a failed job.
                    tracing::warn!(
                        match_id,
                        model = %entry.id,
                        failure = failure.kind(),
                        remediation = failure.remediation(),
                        "model produced no prediction"
                    );
                }
            }
        }

        tracing::info!(
            match_id,
            stored,
            asked = candidates.len(),
            "predictions pass complete"
        );
        Ok(())
    }

    /// One model's gated, fallback-wrapped prediction for one match.
    async fn predict_with_one_model(
        &self,
        m: &Match,
        entry: &ModelEntry,
        analysis: Option<&str>,
    ) -> Result<(), PredictionFailure> {
        let match_ids = vec![m.id.clone()];

        let outcome = self
            .fallback
            .call_with(&self.registry, &entry.id, |provider, _is_fallback| {
                let match_ids = match_ids.clone();
                let m = m.clone();
                async move {
                    self.gated_predict(&provider, &m, &match_ids, analysis).await
                }
            })
            .await;

        match outcome {
            Ok(outcome) => {
                let Some(score) = outcome
                    .reply
                    .predictions
                    .iter()
                    .find(|p| p.match_id == m.id)
                else {
                    // Schema-valid reply that still missed our match.
                    self.note_model_failure(&entry.id).await;
                    return Err(PredictionFailure::ParseFailure(
                        "reply had no prediction for the requested match".to_string(),
                    ));
                };

                self.store
                    .upsert_prediction(&Prediction {
                        match_id: m.id.clone(),
                        model_id: entry.id.clone(),
                        home: score.home,
                        away: score.away,
                        points: None,
                        used_fallback: outcome.used_fallback,
                        fallback_model: outcome
                            .used_fallback
                            .then(|| outcome.model_used.clone()),
                        cost: outcome.reply.cost,
                    })
                    .await
                    .map_err(|e| PredictionFailure::Api {
                        status: 0,
                        message: format!("prediction write failed: {e}"),
                    })?;

                // Health bookkeeping: the primary failed if a substitute
                // answered; whoever answered gets its counter reset.
                if outcome.used_fallback {
                    self.note_model_failure(&entry.id).await;
                    self.note_model_success(&outcome.model_used).await;
                } else {
                    self.note_model_success(&entry.id).await;
                }
                Ok(())
            }
            Err(failure) => {
                // Gate rejections (circuit open, budget spent) are not the
                // model's fault and must not push it toward auto-disable.
                if !matches!(
                    failure,
                    PredictionFailure::CircuitOpen { .. }
                        | PredictionFailure::BudgetExceeded { .. }
                ) {
                    self.note_model_failure(&entry.id).await;
                }
                Err(failure)
            }
        }
    }

    /// Circuit, budget, and deadline gates around one provider call.
    async fn gated_predict(
        &self,
        provider: &Arc<ModelProvider>,
        m: &Match,
        match_ids: &[String],
        analysis: Option<&str>,
    ) -> Result<ProviderReply, PredictionFailure> {
        let service = provider.name().to_string();

        if self.circuit.is_open(&service).await {
            return Err(PredictionFailure::CircuitOpen { service });
        }

        if let Err(BudgetError::Exceeded { used, limit, .. }) =
            self.budget.check_and_increment(&service).await
        {
            return Err(PredictionFailure::BudgetExceeded {
                provider: service,
                used,
                limit,
            });
        }

        let prompt = prompts::prediction_prompt(
            provider.prompt_variant(),
            std::slice::from_ref(m),
            analysis,
        );

        // The backend enforces the same deadline on the wire; the outer
        // race frees the worker slot even if the HTTP stack stalls.
        let deadline = provider.deadline() + std::time::Duration::from_secs(1);
        let result = tokio::time::timeout(deadline, provider.predict(&prompt, match_ids)).await;

        match result {
            Ok(Ok(reply)) => {
                self.circuit.record_success(&service).await;
                Ok(reply)
            }
            Ok(Err(failure)) => {
                if is_service_fault(&failure) {
                    self.circuit.record_failure(&service).await;
                } else {
                    // The service answered; the payload was the problem.
                    self.circuit.record_success(&service).await;
                }
                Err(failure)
            }
            Err(_elapsed) => {
                self.circuit.record_failure(&service).await;
                Err(PredictionFailure::Timeout(deadline))
            }
        }
    }

    /// Same gates for a raw (non-parsed) completion.
    async fn gated_raw_call(
        &self,
        provider: &Arc<ModelProvider>,
        prompt: &str,
    ) -> Result<String, PredictionFailure> {
        let service = provider.name().to_string();

        if self.circuit.is_open(&service).await {
            return Err(PredictionFailure::CircuitOpen { service });
        }
        if let Err(BudgetError::Exceeded { used, limit, .. }) =
            self.budget.check_and_increment(&service).await
        {
            return Err(PredictionFailure::BudgetExceeded {
                provider: service,
                used,
                limit,
            });
        }

        let deadline = provider.deadline() + std::time::Duration::from_secs(1);
        match tokio::time::timeout(deadline, provider.complete_raw(prompt)).await {
            Ok(Ok(completion)) => {
                self.circuit.record_success(&service).await;
                if completion.content.trim().is_empty() {
                    return Err(PredictionFailure::EmptyResponse);
                }
                Ok(completion.content)
            }
            Ok(Err(failure)) => {
                if is_service_fault(&failure) {
                    self.circuit.record_failure(&service).await;
                }
                Err(failure)
            }
            Err(_elapsed) => {
                self.circuit.record_failure(&service).await;
                Err(PredictionFailure::Timeout(deadline))
            }
        }
    }

    // -----------------------------------------------------------------
    // Live monitoring & settlement
    // -----------------------------------------------------------------

    /// Poll the match status and chain the next action: another poll
    /// while the match runs, settlement the moment it finishes.
    async fn run_live_monitor(&self, job: &Job) -> Result<(), PipelineError> {
        let m = self.require_match(&job.match_id).await?;
        let now = Utc::now();

        match m.status {
            MatchStatus::Scheduled | MatchStatus::Live => {
                let next = monitor_sequence(&job.id) + 1;
                let at = now
                    + ChronoDuration::from_std(self.scheduler.live_monitor_interval())
                        .unwrap_or_else(|_| ChronoDuration::minutes(2));
                self.scheduler
                    .schedule_live_monitor(&m.id, next, at)
                    .await?;
            }
            MatchStatus::Finished => {
                tracing::info!(match_id = %m.id, "finish detected, settlement enqueued");
                self.scheduler.schedule_settlement(&m.id, now).await?;
            }
            status => {
                tracing::info!(match_id = %m.id, %status, "monitoring stopped");
            }
        }
        Ok(())
    }

    async fn run_settlement(&self, match_id: &str) -> Result<(), PipelineError> {
        match self.settlement.settle(match_id).await? {
            SettlementOutcome::Settled(scores) => {
                tracing::info!(match_id, models = scores.len(), "settlement complete");
            }
            SettlementOutcome::AlreadySettled(_) => {
                tracing::debug!(match_id, "settlement already applied");
            }
            SettlementOutcome::NoPredictions => {}
        }
        Ok(())
    }

    /// Backfill: bring an out-of-band match (imported, missed during an
    /// outage) up to date with whatever stage it is missing.
    async fn run_backfill(&self, match_id: &str) -> Result<(), PipelineError> {
        let m = self.require_match(match_id).await?;
        let now = Utc::now();

        if m.status == MatchStatus::Finished {
            let has_predictions = !self.store.predictions_for_match(match_id).await?.is_empty();
            let settled = self.store.match_settled_at(match_id).await?.is_some();
            if has_predictions && !settled {
                self.scheduler.schedule_settlement(match_id, now).await?;
            } else {
                tracing::info!(match_id, has_predictions, settled, "backfill: nothing to do");
            }
            return Ok(());
        }

        self.scheduler.schedule_match(&m, now).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------

    async fn require_match(&self, match_id: &str) -> Result<Match, PipelineError> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or_else(|| PipelineError::MatchNotFound(match_id.to_string()))
    }

    async fn eligible_models(&self) -> Result<Vec<(ModelEntry, bool)>, PipelineError> {
        let cooldown = ChronoDuration::from_std(self.config.model_health.reenable_cooldown)
            .unwrap_or_else(|_| ChronoDuration::minutes(30));
        Ok(self.store.eligible_models(Utc::now(), cooldown).await?)
    }

    async fn note_model_failure(&self, model_id: &str) {
        match self
            .store
            .record_model_failure(
                model_id,
                self.config.model_health.disable_threshold,
                Utc::now(),
            )
            .await
        {
            Ok(true) => {
                self.bus.model_state_changed(model_id, false);
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(model = model_id, error = %e, "failure bookkeeping failed"),
        }
    }

    async fn note_model_success(&self, model_id: &str) {
        match self.store.record_model_success(model_id).await {
            Ok(true) => {
                self.bus.model_state_changed(model_id, true);
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(model = model_id, error = %e, "success bookkeeping failed"),
        }
    }
}

/// A failure class that indicts the upstream service rather than the
/// payload; only these trip the circuit.
fn is_service_fault(failure: &PredictionFailure) -> bool {
    matches!(
        failure,
        PredictionFailure::Timeout(_)
            | PredictionFailure::Api { .. }
            | PredictionFailure::RateLimited { .. }
    )
}

/// Sequence number from a live-monitor job id (`live-monitor:m1:3` → 3).
fn monitor_sequence(job_id: &str) -> u32 {
    job_id
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
