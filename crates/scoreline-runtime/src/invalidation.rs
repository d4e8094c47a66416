//! Cache invalidation signals.
//!
//! The front-end keeps a stats cache keyed by a stable namespace; this
//! bus tells it what went stale. Exactly one event is emitted per
//! state-changing event (settlement completion, model enable/disable),
//! and emission is decoupled from delivery: with no
//! subscriber connected the event is dropped, never an error.

use serde::Serialize;
use tokio::sync::broadcast;

/// Why a key was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationReason {
    SettlementCompleted,
    ModelEnabled,
    ModelDisabled,
}

/// One invalidation signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationEvent {
    /// Stable cache key, e.g. `stats:match:m1`.
    pub key: String,
    pub reason: InvalidationReason,
}

/// Cache key for a match's stats.
pub fn match_stats_key(match_id: &str) -> String {
    format!("stats:match:{match_id}")
}

/// Cache key for a model's stats.
pub fn model_stats_key(model_id: &str) -> String {
    format!("stats:model:{model_id}")
}

/// Broadcast bus for invalidation events.
pub struct InvalidationBus {
    tx: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.tx.subscribe()
    }

    /// Emit one event. Returns how many subscribers saw it.
    pub fn emit(&self, event: InvalidationEvent) -> usize {
        tracing::debug!(key = %event.key, reason = ?event.reason, "cache invalidation emitted");
        // A send error only means nobody is listening right now.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn settlement_completed(&self, match_id: &str) -> usize {
        self.emit(InvalidationEvent {
            key: match_stats_key(match_id),
            reason: InvalidationReason::SettlementCompleted,
        })
    }

    pub fn model_state_changed(&self, model_id: &str, enabled: bool) -> usize {
        self.emit(InvalidationEvent {
            key: model_stats_key(model_id),
            reason: if enabled {
                InvalidationReason::ModelEnabled
            } else {
                InvalidationReason::ModelDisabled
            },
        })
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(256)
    }
}
