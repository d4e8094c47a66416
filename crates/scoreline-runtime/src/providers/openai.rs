//! OpenAI-compatible chat completions backend.
//!
//! One client covers every endpoint speaking the `/chat/completions`
//! shape: OpenAI itself, DeepSeek, Groq, local gateways. The base URL is
//! required configuration; the quirks (reasoning tags, language drift)
//! are handled one layer up by the model's response handler and prompt
//! variant, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, CompletionBackend, ProviderCredential, ProviderError, TokenUsage};

const MAX_TOKENS: u32 = 1024;

/// Chat-completions backend for OpenAI-compatible endpoints.
pub struct OpenAiCompatibleBackend {
    credential: ProviderCredential,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        credential: ProviderCredential,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            credential,
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    async fn complete(
        &self,
        prompt: &str,
        deadline: Duration,
    ) -> Result<Completion, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(deadline)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|e| format!("unreadable error body: {e}"));
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.unwrap_or_default();

        Ok(Completion {
            content,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            model: body.model,
        })
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_missing_usage_decodes() {
        // Some compatible gateways omit the usage block entirely.
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": "[]"}}], "model": "deepseek-chat"}"#,
        )
        .unwrap();
        assert!(body.usage.is_none());
        assert_eq!(body.choices[0].message.content.as_deref(), Some("[]"));
    }

    #[test]
    fn test_null_content_decodes() {
        // Reasoning endpoints return null content when tokens run out
        // mid-thought; that surfaces later as EmptyResponse.
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": null}}], "model": "m"}"#,
        )
        .unwrap();
        assert!(body.choices[0].message.content.is_none());
    }
}
