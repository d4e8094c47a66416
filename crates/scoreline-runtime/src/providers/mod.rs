//! LLM provider abstractions for the prediction pipeline.
//!
//! Two layers:
//!
//! - [`CompletionBackend`]: the raw HTTP clients (Anthropic messages API,
//!   OpenAI-compatible chat completions). They know endpoints, auth, and
//!   wire formats, nothing about football.
//! - [`ModelProvider`]: one registered model, a backend plus the model's
//!   quirk policy (timeout class, prompt variant, response handler). This
//!   is the only layer the pipeline talks to, through [`ScoreProvider`].
//!
//! Provider errors are classified locally into the shared failure taxonomy
//! before they leave this module; the fallback orchestrator never sees a
//! bare transport error.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use scoreline_core::domain::{PredictionCost, PromptVariant, ResponseHandler, ScorePrediction};
use scoreline_core::parser;
use scoreline_core::PredictionFailure;

mod anthropic;
mod openai;
mod registry;
pub mod secrets;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiCompatibleBackend;
pub use registry::ProviderRegistry;
pub use secrets::ProviderCredential;

/// Transport-level errors from completion backends.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Map a transport error onto the shared failure taxonomy.
    pub fn classify(self) -> PredictionFailure {
        match self {
            ProviderError::Timeout(d) => PredictionFailure::Timeout(d),
            ProviderError::RateLimited { retry_after } => {
                PredictionFailure::RateLimited { retry_after }
            }
            ProviderError::Api { status, message } => PredictionFailure::Api { status, message },
            ProviderError::Http(message) => PredictionFailure::Api {
                status: 0,
                message,
            },
            ProviderError::Decode(message) => PredictionFailure::Api {
                status: 0,
                message: format!("undecodable response body: {message}"),
            },
            ProviderError::NotConfigured(message) => PredictionFailure::Api {
                status: 0,
                message: format!("not configured: {message}"),
            },
        }
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Raw completion from a backend.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// A raw chat-completion client for one API shape.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Execute a completion with a hard deadline.
    async fn complete(&self, prompt: &str, deadline: Duration)
        -> Result<Completion, ProviderError>;

    /// Backend name for logs and circuit keys.
    fn name(&self) -> &str;
}

/// A successful prediction call.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub predictions: Vec<ScorePrediction>,
    pub raw_response: String,
    pub cost: PredictionCost,
}

/// The call shape every registered model implements, fallback targets
/// included. The pipeline and the fallback orchestrator depend on this
/// trait only.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    async fn predict(
        &self,
        prompt: &str,
        match_ids: &[String],
    ) -> Result<ProviderReply, PredictionFailure>;

    /// Model id as registered (not the backend-side model name).
    fn name(&self) -> &str;
}

/// Cost per million tokens for known model families.
///
/// Used for the cost metadata attached to predictions and the relative
/// cost recorded when a fallback substitutes a model.
pub fn model_rates(model_name: &str) -> (f64, f64) {
    match model_name {
        m if m.contains("opus") => (5.0, 25.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (1.0, 5.0),
        m if m.contains("gpt-4o-mini") => (0.15, 0.6),
        m if m.contains("gpt-4o") => (2.5, 10.0),
        m if m.contains("deepseek") => (0.27, 1.1),
        _ => (1.0, 4.0),
    }
}

fn estimate_cost(model_name: &str, usage: TokenUsage) -> f64 {
    let (input_rate, output_rate) = model_rates(model_name);
    (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate
        + (usage.completion_tokens as f64 / 1_000_000.0) * output_rate
}

/// One registered model: backend + quirk policy.
pub struct ModelProvider {
    id: String,
    backend: Arc<dyn CompletionBackend>,
    response_handler: ResponseHandler,
    prompt_variant: PromptVariant,
    deadline: Duration,
    model_name: String,
}

impl std::fmt::Debug for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProvider")
            .field("id", &self.id)
            .field("response_handler", &self.response_handler)
            .field("prompt_variant", &self.prompt_variant)
            .field("deadline", &self.deadline)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl ModelProvider {
    pub fn new(
        id: impl Into<String>,
        backend: Arc<dyn CompletionBackend>,
        response_handler: ResponseHandler,
        prompt_variant: PromptVariant,
        deadline: Duration,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            backend,
            response_handler,
            prompt_variant,
            deadline,
            model_name: model_name.into(),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn prompt_variant(&self) -> PromptVariant {
        self.prompt_variant
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Raw completion with this model's deadline; used by stages that
    /// want prose (analysis briefs) rather than parsed predictions.
    pub async fn complete_raw(&self, prompt: &str) -> Result<Completion, PredictionFailure> {
        self.backend
            .complete(prompt, self.deadline)
            .await
            .map_err(ProviderError::classify)
    }

    /// Apply this model's response handler before parsing.
    fn preprocess(&self, content: &str) -> String {
        match self.response_handler {
            ResponseHandler::PassThrough => content.to_string(),
            ResponseHandler::StripReasoningTags => parser::strip_reasoning_blocks(content),
            ResponseHandler::ExtractEmbeddedJson => parser::extract_embedded_json(content)
                .unwrap_or_else(|| content.to_string()),
        }
    }
}

#[async_trait]
impl ScoreProvider for ModelProvider {
    async fn predict(
        &self,
        prompt: &str,
        match_ids: &[String],
    ) -> Result<ProviderReply, PredictionFailure> {
        let completion = self
            .backend
            .complete(prompt, self.deadline)
            .await
            .map_err(ProviderError::classify)?;

        let handled = self.preprocess(&completion.content);
        let predictions = parser::parse_predictions(&handled, match_ids)?;

        Ok(ProviderReply {
            predictions,
            raw_response: completion.content,
            cost: PredictionCost {
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
                estimated_cost: estimate_cost(&self.model_name, completion.usage),
            },
        })
    }

    fn name(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted backends shared by provider and pipeline tests.

    use super::*;
    use parking_lot::Mutex;

    /// Backend that replays canned outcomes in order, repeating the last.
    pub struct ScriptedBackend {
        name: &'static str,
        script: Mutex<Vec<Result<String, ProviderError>>>,
        pub calls: std::sync::atomic::AtomicU32,
    }

    impl ScriptedBackend {
        pub fn new(name: &'static str, script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                name,
                script: Mutex::new(script),
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }

        pub fn always(name: &'static str, content: &str) -> Self {
            Self::new(name, vec![Ok(content.to_string())])
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _prompt: &str,
            _deadline: Duration,
        ) -> Result<Completion, ProviderError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut script = self.script.lock();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            };
            next.map(|content| Completion {
                content,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                },
                model: self.name.to_string(),
            })
        }

        fn name(&self) -> &str {
            self.name
        }
    }

}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedBackend;
    use super::*;

    fn provider(backend: ScriptedBackend, handler: ResponseHandler) -> ModelProvider {
        ModelProvider::new(
            "test-model",
            Arc::new(backend),
            handler,
            PromptVariant::Plain,
            Duration::from_secs(5),
            "claude-sonnet-4-5",
        )
    }

    #[tokio::test]
    async fn test_predict_parses_and_costs() {
        let backend = ScriptedBackend::always(
            "anthropic",
            r#"[{"matchId": "m1", "homeScore": 2, "awayScore": 1}]"#,
        );
        let p = provider(backend, ResponseHandler::PassThrough);

        let reply = p.predict("prompt", &["m1".to_string()]).await.unwrap();
        assert_eq!(reply.predictions.len(), 1);
        assert!(reply.cost.estimated_cost > 0.0);
        assert_eq!(reply.cost.prompt_tokens, 100);
    }

    #[tokio::test]
    async fn test_strip_reasoning_handler() {
        let backend = ScriptedBackend::always(
            "deepseek",
            "<think>home side is stronger</think>[{\"matchId\": \"m1\", \"homeScore\": 1, \"awayScore\": 0}]",
        );
        let p = provider(backend, ResponseHandler::StripReasoningTags);

        let reply = p.predict("prompt", &["m1".to_string()]).await.unwrap();
        assert_eq!((reply.predictions[0].home, reply.predictions[0].away), (1, 0));
        // Raw response is preserved untouched for diagnostics.
        assert!(reply.raw_response.contains("<think>"));
    }

    #[tokio::test]
    async fn test_transport_error_is_classified() {
        let backend = ScriptedBackend::new(
            "anthropic",
            vec![Err(ProviderError::Api {
                status: 529,
                message: "overloaded".to_string(),
            })],
        );
        let p = provider(backend, ResponseHandler::PassThrough);

        let err = p.predict("prompt", &["m1".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), "api-error");
    }

    #[test]
    fn test_rates_cover_known_families() {
        assert!(model_rates("claude-opus-4-5").0 > model_rates("claude-haiku-4-5").0);
        assert!(model_rates("unknown-model").0 > 0.0);
    }
}
