//! Circuit breaker with dual-tier persistence.
//!
//! Repeated provider failures open the circuit and short-circuit further
//! calls until a half-open probe proves recovery. State lives in two
//! tiers: a moka fast cache with a freshness TTL, mirrored write-through
//! to the durable store. On a cold read (process restart, expired entry)
//! the durable row is promoted back into the fast tier and logged as
//! recovered. When neither tier is readable the breaker reports open, as
//! flooding a possibly-degraded dependency is the one outcome this
//! component exists to prevent.

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time before an open circuit allows a probe.
    #[serde(with = "crate::config::duration_str")]
    pub recovery_timeout: Duration,

    /// Probe successes needed to close the circuit.
    pub success_threshold: u32,

    /// How long a fast-tier entry stays authoritative.
    #[serde(with = "crate::config::duration_str")]
    pub fast_tier_ttl: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            fast_tier_ttl: Duration::from_secs(300),
        }
    }
}

/// State of one service's circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation.
    Closed { failures: u32 },

    /// Calls short-circuit immediately.
    Open { opened_at: DateTime<Utc> },

    /// One probe call is allowed; everyone else still short-circuits.
    HalfOpen { probing: bool, successes: u32 },
}

impl CircuitState {
    fn kind(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half-open",
        }
    }

    fn failures(&self) -> u32 {
        match self {
            CircuitState::Closed { failures } => *failures,
            _ => 0,
        }
    }

    fn opened_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CircuitState::Open { opened_at } => Some(*opened_at),
            _ => None,
        }
    }

    fn from_row(state: &str, failures: u32, opened_at: Option<DateTime<Utc>>) -> Self {
        match state {
            "open" => CircuitState::Open {
                opened_at: opened_at.unwrap_or_else(Utc::now),
            },
            "half-open" => CircuitState::HalfOpen {
                probing: false,
                successes: 0,
            },
            _ => CircuitState::Closed { failures },
        }
    }
}

/// Per-service circuit breaker.
pub struct CircuitBreaker {
    fast: Cache<String, CircuitState>,
    store: Arc<Store>,
    config: CircuitBreakerConfig,
    /// Serializes read-modify-write cycles on the fast tier.
    transitions: Mutex<()>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<Store>, config: CircuitBreakerConfig) -> Self {
        let fast = Cache::builder()
            .max_capacity(1024)
            .time_to_live(config.fast_tier_ttl)
            .build();
        Self {
            fast,
            store,
            config,
            transitions: Mutex::new(()),
        }
    }

    /// Should calls to this service short-circuit?
    ///
    /// Open circuits past their recovery timeout hand out exactly one
    /// probe slot; concurrent callers keep seeing open until the probe
    /// resolves.
    pub async fn is_open(&self, service: &str) -> bool {
        let state = match self.current_state(service).await {
            Ok(state) => state,
            Err(()) => {
                tracing::warn!(
                    service,
                    "circuit state unreadable in both tiers, failing safe as open"
                );
                return true;
            }
        };

        let _guard = self.transitions.lock();
        // Re-read under the lock: another task may have claimed the probe.
        let state = self.fast.get(service).unwrap_or(state);
        match state {
            CircuitState::Closed { .. } => false,
            CircuitState::Open { opened_at } => {
                let elapsed = Utc::now().signed_duration_since(opened_at);
                if elapsed
                    >= chrono::Duration::from_std(self.config.recovery_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60))
                {
                    // Claim the probe slot for this caller.
                    let next = CircuitState::HalfOpen {
                        probing: true,
                        successes: 0,
                    };
                    self.fast.insert(service.to_string(), next.clone());
                    drop(_guard);
                    tracing::info!(service, "circuit half-open, allowing recovery probe");
                    self.mirror(service, &next).await;
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen { probing, .. } => {
                if probing {
                    true
                } else {
                    self.fast.insert(
                        service.to_string(),
                        CircuitState::HalfOpen {
                            probing: true,
                            successes: 0,
                        },
                    );
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self, service: &str) {
        let state = self.current_state(service).await.unwrap_or(CircuitState::Closed { failures: 0 });

        let next = {
            let _guard = self.transitions.lock();
            let state = self.fast.get(service).unwrap_or(state);
            let next = match state {
                CircuitState::HalfOpen { successes, .. } => {
                    if successes + 1 >= self.config.success_threshold {
                        tracing::info!(service, "circuit closed after successful recovery probe");
                        CircuitState::Closed { failures: 0 }
                    } else {
                        CircuitState::HalfOpen {
                            probing: false,
                            successes: successes + 1,
                        }
                    }
                }
                _ => CircuitState::Closed { failures: 0 },
            };
            self.fast.insert(service.to_string(), next.clone());
            next
        };

        self.mirror(service, &next).await;
    }

    /// Record a failed call.
    pub async fn record_failure(&self, service: &str) {
        let state = self.current_state(service).await.unwrap_or(CircuitState::Closed { failures: 0 });

        let next = {
            let _guard = self.transitions.lock();
            let state = self.fast.get(service).unwrap_or(state);
            let next = match state {
                CircuitState::Closed { failures } => {
                    if failures + 1 >= self.config.failure_threshold {
                        tracing::warn!(
                            service,
                            failures = failures + 1,
                            "circuit opened after repeated failures"
                        );
                        CircuitState::Open {
                            opened_at: Utc::now(),
                        }
                    } else {
                        CircuitState::Closed {
                            failures: failures + 1,
                        }
                    }
                }
                CircuitState::HalfOpen { .. } => {
                    tracing::warn!(service, "circuit reopened after failed recovery probe");
                    CircuitState::Open {
                        opened_at: Utc::now(),
                    }
                }
                open @ CircuitState::Open { .. } => open,
            };
            self.fast.insert(service.to_string(), next.clone());
            next
        };

        self.mirror(service, &next).await;
    }

    /// Current state for status reporting.
    pub async fn state(&self, service: &str) -> CircuitState {
        self.current_state(service)
            .await
            .unwrap_or(CircuitState::Open {
                opened_at: Utc::now(),
            })
    }

    /// Drop the fast tier (tests simulate a cache restart this way).
    pub fn clear_fast_tier(&self) {
        self.fast.invalidate_all();
    }

    /// Fast tier first; on a cold entry, fall back to the durable mirror.
    /// `Err(())` means neither tier produced an answer.
    async fn current_state(&self, service: &str) -> Result<CircuitState, ()> {
        if let Some(state) = self.fast.get(service) {
            return Ok(state);
        }

        match self.store.load_circuit(service).await {
            Ok(Some((state, failures, opened_at))) => {
                let recovered = CircuitState::from_row(&state, failures, opened_at);
                tracing::info!(
                    service,
                    state = recovered.kind(),
                    "circuit state recovered from durable store"
                );
                self.fast.insert(service.to_string(), recovered.clone());
                Ok(recovered)
            }
            Ok(None) => {
                let fresh = CircuitState::Closed { failures: 0 };
                self.fast.insert(service.to_string(), fresh.clone());
                Ok(fresh)
            }
            Err(e) => {
                tracing::warn!(service, error = %e, "durable circuit read failed");
                Err(())
            }
        }
    }

    /// Best-effort write-through to the durable tier. A mirror failure
    /// degrades restart recovery, not the running process, so it warns
    /// instead of propagating.
    async fn mirror(&self, service: &str, state: &CircuitState) {
        if let Err(e) = self
            .store
            .save_circuit(service, state.kind(), state.failures(), state.opened_at())
            .await
        {
            tracing::warn!(service, error = %e, "circuit mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn breaker(threshold: u32) -> CircuitBreaker {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        CircuitBreaker::new(
            store,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
                fast_tier_ttl: Duration::from_secs(300),
            },
        )
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = breaker(3).await;
        assert!(!cb.is_open("anthropic").await);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let cb = breaker(2).await;

        cb.record_failure("anthropic").await;
        assert!(!cb.is_open("anthropic").await);

        cb.record_failure("anthropic").await;
        assert!(cb.is_open("anthropic").await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3).await;

        cb.record_failure("anthropic").await;
        cb.record_failure("anthropic").await;
        cb.record_success("anthropic").await;

        cb.record_failure("anthropic").await;
        cb.record_failure("anthropic").await;
        assert!(!cb.is_open("anthropic").await);
    }

    #[tokio::test]
    async fn test_services_are_independent() {
        let cb = breaker(1).await;
        cb.record_failure("anthropic").await;

        assert!(cb.is_open("anthropic").await);
        assert!(!cb.is_open("deepseek").await);
    }

    #[tokio::test]
    async fn test_recovered_from_durable_store_after_fast_tier_wipe() {
        let cb = breaker(1).await;
        cb.record_failure("anthropic").await;
        assert!(cb.is_open("anthropic").await);

        // Simulate a cache restart: fast tier gone, durable row remains.
        cb.clear_fast_tier();
        assert!(cb.is_open("anthropic").await, "open state must survive the fast tier");
    }

    #[tokio::test]
    async fn test_half_open_allows_single_probe() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let cb = CircuitBreaker::new(
            store,
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(0),
                success_threshold: 1,
                fast_tier_ttl: Duration::from_secs(300),
            },
        );

        cb.record_failure("anthropic").await;

        // Recovery timeout of zero: first caller gets the probe slot.
        assert!(!cb.is_open("anthropic").await);
        // Second caller does not.
        assert!(cb.is_open("anthropic").await);

        // Probe success closes the circuit for everyone.
        cb.record_success("anthropic").await;
        assert!(!cb.is_open("anthropic").await);
        assert!(!cb.is_open("anthropic").await);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let cb = CircuitBreaker::new(
            store,
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(0),
                success_threshold: 1,
                fast_tier_ttl: Duration::from_secs(300),
            },
        );

        cb.record_failure("anthropic").await;
        assert!(!cb.is_open("anthropic").await); // probe slot

        cb.record_failure("anthropic").await; // probe fails
        let state = cb.state("anthropic").await;
        assert!(matches!(state, CircuitState::Open { .. }));
    }
}
