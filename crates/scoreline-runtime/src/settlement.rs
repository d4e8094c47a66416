//! Transactional settlement of finished matches.
//!
//! Once a match finishes, every prediction on it is scored with the quota
//! function from `scoreline-core` and the points are written in a single
//! transaction, serialized per match: a retry racing the original cannot
//! double-score. Settlement is idempotent by construction: the scoring
//! function is deterministic over the stored predictions, so re-running
//! overwrites every row with the values it already has.
//!
//! Matches are independent: one match's settlement failing never blocks
//! another's, and the per-match locks make no global ordering claims.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use scoreline_core::domain::{MatchStatus, ScorePrediction};
use scoreline_core::scoring::{score_match, SettledScore};

use crate::invalidation::InvalidationBus;
use crate::store::{Store, StoreError};

/// Errors from settlement. `MissingUpstream` is the retryable pipeline
/// fault; the rest indicate the job fired at the wrong moment.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("match '{0}' not found")]
    MatchNotFound(String),

    #[error("match '{match_id}' is {status}, not finished")]
    NotFinished {
        match_id: String,
        status: MatchStatus,
    },

    #[error("match '{0}' is finished but has no final score")]
    MissingResult(String),

    #[error("match '{0}' has an analysis brief but no predictions; upstream predictions failed")]
    MissingUpstream(String),
}

impl SettlementError {
    /// Should the job queue retry this settlement attempt?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::Store(_)
                | SettlementError::MissingUpstream(_)
                | SettlementError::MissingResult(_)
        )
    }
}

/// What a settlement run did.
#[derive(Debug)]
pub enum SettlementOutcome {
    /// First settlement of this match; invalidation was emitted.
    Settled(Vec<SettledScore>),

    /// Re-run on an already-settled match: same values, no new event.
    AlreadySettled(Vec<SettledScore>),

    /// Legitimately unpredicted match (no analysis, no predictions).
    NoPredictions,
}

/// Settlement engine with per-match serialization.
pub struct SettlementEngine {
    store: Arc<Store>,
    bus: Arc<InvalidationBus>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SettlementEngine {
    pub fn new(store: Arc<Store>, bus: Arc<InvalidationBus>) -> Self {
        Self {
            store,
            bus,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Settle one match. Safe to call concurrently with itself and with
    /// retries; concurrent callers for the same match serialize, callers
    /// for different matches do not.
    pub async fn settle(&self, match_id: &str) -> Result<SettlementOutcome, SettlementError> {
        let lock = self.match_lock(match_id);
        let _guard = lock.lock().await;

        let m = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| SettlementError::MatchNotFound(match_id.to_string()))?;

        if m.status != MatchStatus::Finished {
            return Err(SettlementError::NotFinished {
                match_id: match_id.to_string(),
                status: m.status,
            });
        }
        let (Some(result_home), Some(result_away)) = (m.home_score, m.away_score) else {
            return Err(SettlementError::MissingResult(match_id.to_string()));
        };

        let predictions = self.store.predictions_for_match(match_id).await?;
        if predictions.is_empty() {
            // Zero predictions with an analysis brief means the upstream
            // predictions stage failed: retryable. Without one, this is
            // an unpredicted or imported historical match: skip.
            if self.store.get_analysis(match_id).await?.is_some() {
                return Err(SettlementError::MissingUpstream(match_id.to_string()));
            }
            tracing::info!(match_id, "no predictions to settle, skipping");
            return Ok(SettlementOutcome::NoPredictions);
        }

        let board: Vec<(String, ScorePrediction)> = predictions
            .iter()
            .map(|p| {
                (
                    p.model_id.clone(),
                    ScorePrediction {
                        match_id: p.match_id.clone(),
                        home: p.home,
                        away: p.away,
                    },
                )
            })
            .collect();
        let scores = score_match(result_home, result_away, &board);

        let already_settled = self.store.match_settled_at(match_id).await?.is_some();

        // One transaction writes every row and the settlement stamp; a
        // concurrent attempt serializes behind the match lock above and
        // then behind SQLite's write transaction.
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        for score in &scores {
            sqlx::query("UPDATE predictions SET points = ? WHERE match_id = ? AND model_id = ?")
                .bind(i64::from(score.points))
                .bind(match_id)
                .bind(&score.model_id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        sqlx::query("UPDATE matches SET settled_at = COALESCE(settled_at, ?) WHERE id = ?")
            .bind(Utc::now())
            .bind(match_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        if already_settled {
            tracing::debug!(match_id, "re-settlement produced identical values");
            return Ok(SettlementOutcome::AlreadySettled(scores));
        }

        tracing::info!(
            match_id,
            models = scores.len(),
            "match settled"
        );
        self.bus.settlement_completed(match_id);
        Ok(SettlementOutcome::Settled(scores))
    }

    fn match_lock(&self, match_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scoreline_core::domain::{Match, Prediction, PredictionCost};

    async fn engine_with_match(
        status: MatchStatus,
        score: Option<(u8, u8)>,
    ) -> (SettlementEngine, Arc<Store>, Arc<InvalidationBus>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let bus = Arc::new(InvalidationBus::default());
        store
            .upsert_match(&Match {
                id: "m1".to_string(),
                home_team: "FCB".to_string(),
                away_team: "BVB".to_string(),
                competition: "bundesliga".to_string(),
                kickoff: Utc.with_ymd_and_hms(2026, 8, 15, 14, 30, 0).unwrap(),
                status,
                home_score: score.map(|s| s.0),
                away_score: score.map(|s| s.1),
            })
            .await
            .unwrap();
        let engine = SettlementEngine::new(store.clone(), bus.clone());
        (engine, store, bus)
    }

    fn prediction(model_id: &str, home: u8, away: u8) -> Prediction {
        Prediction {
            match_id: "m1".to_string(),
            model_id: model_id.to_string(),
            home,
            away,
            points: None,
            used_fallback: false,
            fallback_model: None,
            cost: PredictionCost::default(),
        }
    }

    #[tokio::test]
    async fn test_settles_and_writes_points() {
        let (engine, store, bus) = engine_with_match(MatchStatus::Finished, Some((2, 1))).await;
        let mut rx = bus.subscribe();
        store.upsert_prediction(&prediction("exact", 2, 1)).await.unwrap();
        store.upsert_prediction(&prediction("wrong", 0, 2)).await.unwrap();

        let outcome = engine.settle("m1").await.unwrap();
        let SettlementOutcome::Settled(scores) = outcome else {
            panic!("expected fresh settlement");
        };
        assert_eq!(scores.len(), 2);

        let rows = store.predictions_for_match("m1").await.unwrap();
        let exact = rows.iter().find(|p| p.model_id == "exact").unwrap();
        let wrong = rows.iter().find(|p| p.model_id == "wrong").unwrap();
        // Lone correct tendency: 6 + diff + exact, capped at 10.
        assert_eq!(exact.points, Some(10));
        assert_eq!(wrong.points, Some(0));

        // Exactly one invalidation for the state change.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "stats:match:m1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resettlement_is_idempotent() {
        let (engine, store, bus) = engine_with_match(MatchStatus::Finished, Some((1, 1))).await;
        let mut rx = bus.subscribe();
        store.upsert_prediction(&prediction("a", 1, 1)).await.unwrap();
        store.upsert_prediction(&prediction("b", 2, 0)).await.unwrap();

        let first = engine.settle("m1").await.unwrap();
        let second = engine.settle("m1").await.unwrap();

        let SettlementOutcome::Settled(first_scores) = first else {
            panic!("expected fresh settlement");
        };
        let SettlementOutcome::AlreadySettled(second_scores) = second else {
            panic!("expected idempotent re-run");
        };
        assert_eq!(first_scores, second_scores);

        // Points never accumulate across runs.
        let rows = store.predictions_for_match("m1").await.unwrap();
        let a = rows.iter().find(|p| p.model_id == "a").unwrap();
        assert_eq!(a.points, first_scores.iter().find(|s| s.model_id == "a").map(|s| s.points));

        // And only the first run invalidated.
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_settlement_single_winner() {
        let (engine, store, _bus) = engine_with_match(MatchStatus::Finished, Some((3, 0))).await;
        store.upsert_prediction(&prediction("a", 3, 0)).await.unwrap();
        let engine = Arc::new(engine);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.settle("m1").await })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                SettlementOutcome::Settled(_) => fresh += 1,
                SettlementOutcome::AlreadySettled(_) => {}
                SettlementOutcome::NoPredictions => panic!("predictions exist"),
            }
        }
        assert_eq!(fresh, 1, "exactly one run may observe the fresh settlement");
    }

    #[tokio::test]
    async fn test_unpredicted_match_is_skipped() {
        let (engine, _store, _bus) = engine_with_match(MatchStatus::Finished, Some((1, 0))).await;
        let outcome = engine.settle("m1").await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::NoPredictions));
    }

    #[tokio::test]
    async fn test_missing_predictions_with_analysis_is_retryable() {
        let (engine, store, _bus) = engine_with_match(MatchStatus::Finished, Some((1, 0))).await;
        store.save_analysis("m1", "brief exists").await.unwrap();

        let err = engine.settle("m1").await.unwrap_err();
        assert!(matches!(err, SettlementError::MissingUpstream(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unfinished_match_refused() {
        let (engine, _store, _bus) = engine_with_match(MatchStatus::Live, None).await;
        let err = engine.settle("m1").await.unwrap_err();
        assert!(matches!(err, SettlementError::NotFinished { .. }));
    }

    #[tokio::test]
    async fn test_finished_without_score_refused() {
        let (engine, _store, _bus) = engine_with_match(MatchStatus::Finished, None).await;
        let err = engine.settle("m1").await.unwrap_err();
        assert!(matches!(err, SettlementError::MissingResult(_)));
    }
}
