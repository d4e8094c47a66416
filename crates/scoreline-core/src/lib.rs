//! # scoreline-core
//!
//! Deterministic domain engine for the scoreline prediction pipeline.
//!
//! This crate holds everything that can be computed without I/O:
//! the domain model, the multi-strategy response parser, the failure
//! taxonomy, and the Kicktipp quota scoring function.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input always produces same output
//! 2. **No I/O**: nothing here calls a provider or touches storage
//! 3. **Total**: parsing and scoring never panic on hostile input
//! 4. **Classified**: every failure maps to exactly one taxonomy variant
//!
//! ## Example
//!
//! ```rust
//! use scoreline_core::{parse_predictions, score_match};
//!
//! let raw = r#"[{"matchId": "m1", "homeScore": 2, "awayScore": 1}]"#;
//! let predictions = parse_predictions(raw, &["m1".to_string()]).unwrap();
//! assert_eq!(predictions[0].home, 2);
//!
//! let board: Vec<_> = predictions
//!     .into_iter()
//!     .map(|p| ("model-a".to_string(), p))
//!     .collect();
//! let settled = score_match(2, 1, &board);
//! assert_eq!(settled[0].points, 6);
//! ```

pub mod domain;
pub mod failure;
pub mod parser;
pub mod scoring;

// Re-export main types at crate root
pub use domain::{
    job_id, Job, JobStatus, JobType, Match, MatchStatus, ModelEntry, Prediction, PredictionCost,
    PromptVariant, ProviderBackend, ResponseHandler, ScorePrediction, Tendency, TimeoutClass,
    MAX_SCORE,
};
pub use failure::PredictionFailure;
pub use parser::{extract_embedded_json, parse_predictions, strip_reasoning_blocks};
pub use scoring::{score_match, tendency_points, SettledScore, MAX_POINTS};
