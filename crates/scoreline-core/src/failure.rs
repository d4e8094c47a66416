//! Failure taxonomy for the prediction path.
//!
//! Every way a provider call can go wrong maps to exactly one variant, and
//! each variant implies a different fix. Collapsing these into a generic
//! "failed" would make the remediation paths indistinguishable downstream,
//! so the fallback orchestrator and job retry logic match on the variant.

use std::time::Duration;
use thiserror::Error;

/// A classified prediction failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionFailure {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("api error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("response not in target language")]
    LanguageMismatch,

    #[error("reasoning tags leaked into response")]
    ThinkingTagLeak,

    #[error("could not extract predictions: {0}")]
    ParseFailure(String),

    #[error("daily budget exceeded for {provider}: {used}/{limit}")]
    BudgetExceeded {
        provider: String,
        used: u32,
        limit: u32,
    },

    #[error("circuit open for {service}")]
    CircuitOpen { service: String },
}

impl PredictionFailure {
    /// Stable label used for metrics and failure counters.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionFailure::Timeout(_) => "timeout",
            PredictionFailure::Api { .. } => "api-error",
            PredictionFailure::RateLimited { .. } => "rate-limited",
            PredictionFailure::EmptyResponse => "empty-response",
            PredictionFailure::LanguageMismatch => "language-mismatch",
            PredictionFailure::ThinkingTagLeak => "thinking-tag-leak",
            PredictionFailure::ParseFailure(_) => "parse-failure",
            PredictionFailure::BudgetExceeded { .. } => "budget-exceeded",
            PredictionFailure::CircuitOpen { .. } => "circuit-open",
        }
    }

    /// The fix path implied by this failure class. Logged alongside the
    /// error so operators see the remediation, not just the symptom.
    pub fn remediation(&self) -> &'static str {
        match self {
            PredictionFailure::Timeout(_) => "raise the model's timeout class",
            PredictionFailure::Api { .. } => "retry with backoff",
            PredictionFailure::RateLimited { .. } => "retry after the rate-limit window",
            PredictionFailure::EmptyResponse => "retry once, then fall back",
            PredictionFailure::LanguageMismatch => "switch to the language-enforced prompt",
            PredictionFailure::ThinkingTagLeak => "enable the strip-reasoning-tags handler",
            PredictionFailure::ParseFailure(_) => "switch to the json-emphasis prompt",
            PredictionFailure::BudgetExceeded { .. } => "defer to the next budget window",
            PredictionFailure::CircuitOpen { .. } => "short-circuit until the probe succeeds",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_kind_is_distinct() {
        let failures = [
            PredictionFailure::Timeout(Duration::from_secs(30)),
            PredictionFailure::Api {
                status: 500,
                message: "oops".into(),
            },
            PredictionFailure::RateLimited { retry_after: None },
            PredictionFailure::EmptyResponse,
            PredictionFailure::LanguageMismatch,
            PredictionFailure::ThinkingTagLeak,
            PredictionFailure::ParseFailure("no json".into()),
            PredictionFailure::BudgetExceeded {
                provider: "anthropic".into(),
                used: 101,
                limit: 100,
            },
            PredictionFailure::CircuitOpen {
                service: "openai".into(),
            },
        ];

        let mut kinds: Vec<_> = failures.iter().map(|f| f.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), failures.len());
    }

    #[test]
    fn test_remediation_differs_by_class() {
        let timeout = PredictionFailure::Timeout(Duration::from_secs(5));
        let parse = PredictionFailure::ParseFailure("x".into());
        assert_ne!(timeout.remediation(), parse.remediation());
    }
}
