//! Static provider registry.
//!
//! Built once at startup from configuration; the pipeline resolves models
//! by id from an immutable map. Backends form a closed set: adding one
//! means adding a variant to [`ProviderBackend`] and an arm here, never
//! runtime plugin discovery.

use std::collections::BTreeMap;
use std::sync::Arc;

use scoreline_core::domain::ProviderBackend;

use crate::config::{ModelConfig, RuntimeConfig};

use super::{
    AnthropicBackend, ModelProvider, OpenAiCompatibleBackend, ProviderCredential, ProviderError,
};

const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Immutable model-id → provider map.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<ModelProvider>>,
}

impl ProviderRegistry {
    /// Build every configured provider, failing fast on missing
    /// credentials. A key that would 401 at T-30m before kickoff should
    /// fail the boot instead.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ProviderError> {
        let mut providers = BTreeMap::new();
        for model in &config.models {
            let provider = build_provider(config, model)?;
            providers.insert(model.id.clone(), Arc::new(provider));
        }
        tracing::info!(models = providers.len(), "provider registry built");
        Ok(Self { providers })
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<ModelProvider>> {
        self.providers.get(model_id).cloned()
    }

    pub fn resolve(&self, model_id: &str) -> Result<Arc<ModelProvider>, ProviderError> {
        self.get(model_id).ok_or_else(|| {
            ProviderError::NotConfigured(format!("no provider registered for '{model_id}'"))
        })
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registry for tests: pre-built providers, no credentials involved.
    #[cfg(test)]
    pub(crate) fn from_providers(entries: Vec<(String, ModelProvider)>) -> Self {
        Self {
            providers: entries
                .into_iter()
                .map(|(id, p)| (id, Arc::new(p)))
                .collect(),
        }
    }
}

fn build_provider(
    config: &RuntimeConfig,
    model: &ModelConfig,
) -> Result<ModelProvider, ProviderError> {
    let deadline = config.timeout_for(model.timeout_class);

    let backend: Arc<dyn super::CompletionBackend> = match model.backend {
        ProviderBackend::Anthropic => {
            let env = model.api_key_env.as_deref().unwrap_or(ANTHROPIC_API_KEY_ENV);
            let credential = ProviderCredential::from_env(env)?;
            Arc::new(AnthropicBackend::new(
                credential,
                model.model_name.clone(),
                model.base_url.clone(),
            ))
        }
        ProviderBackend::OpenAiCompatible => {
            let env = model.api_key_env.as_deref().unwrap_or(OPENAI_API_KEY_ENV);
            let credential = ProviderCredential::from_env(env)?;
            let base_url = model.base_url.clone().ok_or_else(|| {
                ProviderError::NotConfigured(format!("model '{}' has no base_url", model.id))
            })?;
            Arc::new(OpenAiCompatibleBackend::new(
                credential,
                model.model_name.clone(),
                base_url,
            ))
        }
    };

    Ok(ModelProvider::new(
        model.id.clone(),
        backend,
        model.response_handler,
        model.prompt_variant,
        deadline,
        model.model_name.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::ScriptedBackend;
    use scoreline_core::domain::{PromptVariant, ResponseHandler};
    use std::time::Duration;

    fn scripted(id: &str) -> (String, ModelProvider) {
        (
            id.to_string(),
            ModelProvider::new(
                id,
                Arc::new(ScriptedBackend::always("test", "[]")),
                ResponseHandler::PassThrough,
                PromptVariant::Plain,
                Duration::from_secs(1),
                "test-model",
            ),
        )
    }

    #[test]
    fn test_resolve_known_model() {
        let registry = ProviderRegistry::from_providers(vec![scripted("claude")]);
        assert!(registry.resolve("claude").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_model_fails() {
        let registry = ProviderRegistry::from_providers(vec![scripted("claude")]);
        let err = registry.resolve("ghost").unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn test_model_ids_are_ordered() {
        let registry =
            ProviderRegistry::from_providers(vec![scripted("zeta"), scripted("alpha")]);
        assert_eq!(registry.model_ids(), vec!["alpha", "zeta"]);
    }
}
