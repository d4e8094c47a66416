//! Resilience primitives for the prediction pipeline.
//!
//! This module provides:
//! - Circuit breaker with dual-tier (fast cache + durable) persistence
//! - Per-provider daily budget enforcement
//! - Validated fallback mapping with one-hop substitution

mod budget;
mod circuit;
mod fallback;

pub use budget::{BudgetEnforcer, BudgetError, BudgetReceipt};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback::{FallbackGraph, FallbackGraphError, FallbackOrchestrator, FallbackOutcome};
