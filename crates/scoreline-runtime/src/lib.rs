//! # scoreline-runtime
//!
//! Async runtime for the scoreline prediction pipeline.
//!
//! This crate coordinates the full lifecycle around the deterministic
//! engine in `scoreline-core`: kickoff-relative scheduling, multi-provider
//! LLM calls behind circuit/budget/fallback gates, sqlite-backed jobs and
//! predictions, transactional settlement, and the admin retry surface.
//!
//! ## Layering
//!
//! - [`providers`]: HTTP backends and the per-model call policy
//! - [`resilience`]: circuit breaker, daily budgets, fallback graph
//! - [`store`]: the single durable sqlite database
//! - [`scheduler`] / [`jobs`]: kickoff-offset planning and worker pools
//! - [`settlement`]: per-match transactional scoring
//! - [`pipeline`]: the coordinator tying the stages together
//! - [`admin`] / [`invalidation`]: the outward-facing edges

pub mod admin;
pub mod config;
pub mod invalidation;
pub mod jobs;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod scheduler;
pub mod settlement;
pub mod store;

pub use config::{ConfigError, RuntimeConfig};
pub use invalidation::{InvalidationBus, InvalidationEvent};
pub use jobs::JobRunner;
pub use pipeline::{Pipeline, PipelineError};
pub use providers::ProviderRegistry;
pub use resilience::{
    BudgetEnforcer, CircuitBreaker, FallbackGraph, FallbackOrchestrator,
};
pub use scheduler::Scheduler;
pub use settlement::SettlementEngine;
pub use store::Store;
