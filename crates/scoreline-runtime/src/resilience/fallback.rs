//! Fallback mapping and one-hop substitution.
//!
//! Every model may name one statically mapped equivalent to stand in when
//! it fails. The mapping is validated once at startup: dangling targets,
//! cycles, and chains deeper than the configured hop limit are fatal boot
//! errors, not runtime surprises. The runtime wrapper still tracks a
//! visited set per logical request as a belt against any validation gap,
//! and every substitution is recorded in the outcome: a model is never
//! swapped silently.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use scoreline_core::PredictionFailure;

use crate::config::ModelConfig;
use crate::providers::{model_rates, ModelProvider, ProviderRegistry, ProviderReply};

/// Errors from fallback graph validation.
#[derive(Error, Debug, PartialEq)]
pub enum FallbackGraphError {
    #[error("model '{from}' falls back to unknown model '{to}'")]
    Dangling { from: String, to: String },

    #[error("fallback cycle detected: {path}")]
    Cycle { path: String },

    #[error("fallback chain from '{from}' is {depth} hops deep (max {max})")]
    DepthExceeded {
        from: String,
        depth: usize,
        max: usize,
    },
}

/// Validated, immutable fallback mapping.
#[derive(Debug, Clone)]
pub struct FallbackGraph {
    targets: BTreeMap<String, String>,
    max_depth: usize,
}

impl FallbackGraph {
    /// Build and validate the graph from the model roster.
    ///
    /// Walks the chain from every node: a revisited node is a cycle, a
    /// chain longer than `max_depth` hops is rejected even when acyclic.
    pub fn from_models(
        models: &[ModelConfig],
        max_depth: usize,
    ) -> Result<Self, FallbackGraphError> {
        let known: HashSet<&str> = models.iter().map(|m| m.id.as_str()).collect();
        let mut targets = BTreeMap::new();

        for model in models {
            if let Some(target) = &model.fallback {
                if !known.contains(target.as_str()) {
                    return Err(FallbackGraphError::Dangling {
                        from: model.id.clone(),
                        to: target.clone(),
                    });
                }
                targets.insert(model.id.clone(), target.clone());
            }
        }

        for start in targets.keys() {
            let mut visited = vec![start.clone()];
            let mut current = start.as_str();
            let mut depth = 0usize;

            while let Some(next) = targets.get(current) {
                depth += 1;
                if visited.iter().any(|v| v == next) {
                    visited.push(next.clone());
                    return Err(FallbackGraphError::Cycle {
                        path: visited.join(" -> "),
                    });
                }
                if depth > max_depth {
                    return Err(FallbackGraphError::DepthExceeded {
                        from: start.clone(),
                        depth,
                        max: max_depth,
                    });
                }
                visited.push(next.clone());
                current = next;
            }
        }

        Ok(Self { targets, max_depth })
    }

    pub fn target(&self, model_id: &str) -> Option<&str> {
        self.targets.get(model_id).map(String::as_str)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Skip validation, only for exercising the runtime visited-set
    /// guard in tests.
    #[cfg(test)]
    pub(crate) fn new_unchecked(targets: BTreeMap<String, String>, max_depth: usize) -> Self {
        Self { targets, max_depth }
    }
}

/// Result of a fallback-wrapped call.
#[derive(Debug)]
pub struct FallbackOutcome {
    pub reply: ProviderReply,

    /// Model that actually produced the reply.
    pub model_used: String,

    pub used_fallback: bool,

    /// Cost of the model used relative to the requested one (1.0 when no
    /// substitution happened). Downstream cost tracking needs this when a
    /// cheap model is replaced by an expensive one.
    pub relative_cost: f64,

    /// Why the primary was abandoned, when it was.
    pub primary_failure: Option<PredictionFailure>,
}

/// Wraps provider calls with the one-hop substitution policy.
pub struct FallbackOrchestrator {
    graph: FallbackGraph,
}

impl FallbackOrchestrator {
    pub fn new(graph: FallbackGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &FallbackGraph {
        &self.graph
    }

    /// Run `attempt` against the requested model; on typed failure, retry
    /// once against its mapped equivalent.
    ///
    /// `attempt` is supplied by the caller so pipeline gates (circuit,
    /// budget, deadline) apply uniformly to the primary and substitute.
    pub async fn call_with<F, Fut>(
        &self,
        registry: &ProviderRegistry,
        model_id: &str,
        attempt: F,
    ) -> Result<FallbackOutcome, PredictionFailure>
    where
        F: Fn(Arc<ModelProvider>, bool) -> Fut,
        Fut: Future<Output = Result<ProviderReply, PredictionFailure>>,
    {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(model_id);

        let primary = registry
            .resolve(model_id)
            .map_err(|e| e.classify())?;

        let primary_err = match attempt(primary.clone(), false).await {
            Ok(reply) => {
                return Ok(FallbackOutcome {
                    reply,
                    model_used: model_id.to_string(),
                    used_fallback: false,
                    relative_cost: 1.0,
                    primary_failure: None,
                });
            }
            Err(e) => e,
        };

        tracing::warn!(
            model = model_id,
            failure = primary_err.kind(),
            remediation = primary_err.remediation(),
            "primary model failed, consulting fallback mapping"
        );

        let mut hops = 0usize;
        let Some(target) = self.graph.target(model_id) else {
            return Err(primary_err);
        };
        hops += 1;
        if hops > self.graph.max_depth() || visited.contains(target) {
            tracing::warn!(model = model_id, target, "fallback guard refused substitution");
            return Err(primary_err);
        }
        visited.insert(target);

        let substitute = match registry.resolve(target) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(target, error = %e, "fallback target unresolvable");
                return Err(primary_err);
            }
        };

        match attempt(substitute.clone(), true).await {
            Ok(reply) => {
                let relative_cost =
                    blended_rate(substitute.model_name()) / blended_rate(primary.model_name());
                tracing::info!(
                    model = model_id,
                    substitute = target,
                    relative_cost,
                    "fallback model answered"
                );
                Ok(FallbackOutcome {
                    reply,
                    model_used: target.to_string(),
                    used_fallback: true,
                    relative_cost,
                    primary_failure: Some(primary_err),
                })
            }
            Err(fallback_err) => {
                tracing::warn!(
                    model = model_id,
                    substitute = target,
                    failure = fallback_err.kind(),
                    "fallback model also failed"
                );
                Err(fallback_err)
            }
        }
    }
}

fn blended_rate(model_name: &str) -> f64 {
    let (input, output) = model_rates(model_name);
    input + output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::ScriptedBackend;
    use crate::providers::{ProviderError, ScoreProvider};
    use scoreline_core::domain::{ProviderBackend, ResponseHandler};
    use std::time::Duration;

    fn model(id: &str, fallback: Option<&str>) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            backend: ProviderBackend::Anthropic,
            model_name: "claude-sonnet-4-5".to_string(),
            base_url: None,
            api_key_env: None,
            fallback: fallback.map(String::from),
            timeout_class: Default::default(),
            prompt_variant: Default::default(),
            response_handler: Default::default(),
        }
    }

    #[test]
    fn test_valid_graph() {
        let graph =
            FallbackGraph::from_models(&[model("a", Some("b")), model("b", None)], 1).unwrap();
        assert_eq!(graph.target("a"), Some("b"));
        assert_eq!(graph.target("b"), None);
    }

    #[test]
    fn test_dangling_target_rejected() {
        let err = FallbackGraph::from_models(&[model("a", Some("ghost"))], 1).unwrap_err();
        assert_eq!(
            err,
            FallbackGraphError::Dangling {
                from: "a".to_string(),
                to: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let err = FallbackGraph::from_models(
            &[model("a", Some("b")), model("b", Some("a"))],
            5,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackGraphError::Cycle { .. }));
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = FallbackGraph::from_models(&[model("a", Some("a"))], 1).unwrap_err();
        assert!(matches!(err, FallbackGraphError::Cycle { .. }));
    }

    #[test]
    fn test_chain_deeper_than_max_rejected() {
        let models = [
            model("a", Some("b")),
            model("b", Some("c")),
            model("c", None),
        ];
        let err = FallbackGraph::from_models(&models, 1).unwrap_err();
        assert!(matches!(err, FallbackGraphError::DepthExceeded { depth: 2, .. }));

        // The same chain is fine with a larger budget.
        assert!(FallbackGraph::from_models(&models, 2).is_ok());
    }

    fn provider(id: &str, backend: ScriptedBackend) -> (String, ModelProvider) {
        (
            id.to_string(),
            ModelProvider::new(
                id,
                Arc::new(backend),
                ResponseHandler::PassThrough,
                Default::default(),
                Duration::from_secs(1),
                "claude-sonnet-4-5",
            ),
        )
    }

    const GOOD: &str = r#"[{"matchId": "m1", "homeScore": 2, "awayScore": 1}]"#;

    fn api_error() -> Result<String, ProviderError> {
        Err(ProviderError::Api {
            status: 500,
            message: "down".to_string(),
        })
    }

    async fn run(
        orchestrator: &FallbackOrchestrator,
        registry: &ProviderRegistry,
        model_id: &str,
    ) -> Result<FallbackOutcome, PredictionFailure> {
        let ids = vec!["m1".to_string()];
        orchestrator
            .call_with(registry, model_id, |provider, _is_fallback| {
                let ids = ids.clone();
                async move { provider.predict("prompt", &ids).await }
            })
            .await
    }

    #[tokio::test]
    async fn test_primary_success_uses_no_fallback() {
        let registry = ProviderRegistry::from_providers(vec![
            provider("a", ScriptedBackend::always("x", GOOD)),
            provider("b", ScriptedBackend::always("x", GOOD)),
        ]);
        let graph = FallbackGraph::from_models(&[model("a", Some("b")), model("b", None)], 1)
            .unwrap();
        let orchestrator = FallbackOrchestrator::new(graph);

        let outcome = run(&orchestrator, &registry, "a").await.unwrap();
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.model_used, "a");
        assert_eq!(outcome.relative_cost, 1.0);
        assert!(outcome.primary_failure.is_none());
    }

    #[tokio::test]
    async fn test_failure_substitutes_mapped_model() {
        let registry = ProviderRegistry::from_providers(vec![
            provider("a", ScriptedBackend::new("x", vec![api_error()])),
            provider("b", ScriptedBackend::always("x", GOOD)),
        ]);
        let graph = FallbackGraph::from_models(&[model("a", Some("b")), model("b", None)], 1)
            .unwrap();
        let orchestrator = FallbackOrchestrator::new(graph);

        let outcome = run(&orchestrator, &registry, "a").await.unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.model_used, "b");
        assert_eq!(
            outcome.primary_failure.as_ref().map(|f| f.kind()),
            Some("api-error")
        );
    }

    #[tokio::test]
    async fn test_no_mapping_surfaces_primary_failure() {
        let registry = ProviderRegistry::from_providers(vec![provider(
            "a",
            ScriptedBackend::new("x", vec![api_error()]),
        )]);
        let graph = FallbackGraph::from_models(&[model("a", None)], 1).unwrap();
        let orchestrator = FallbackOrchestrator::new(graph);

        let err = run(&orchestrator, &registry, "a").await.unwrap_err();
        assert_eq!(err.kind(), "api-error");
    }

    #[tokio::test]
    async fn test_visited_set_blocks_self_substitution() {
        // An (invalid) self-loop smuggled past validation must still be
        // refused at runtime.
        let mut targets = BTreeMap::new();
        targets.insert("a".to_string(), "a".to_string());
        let orchestrator = FallbackOrchestrator::new(FallbackGraph::new_unchecked(targets, 1));

        let registry = ProviderRegistry::from_providers(vec![provider(
            "a",
            ScriptedBackend::new("x", vec![api_error()]),
        )]);

        let err = run(&orchestrator, &registry, "a").await.unwrap_err();
        assert_eq!(err.kind(), "api-error");
    }

    #[tokio::test]
    async fn test_both_failing_surfaces_fallback_failure() {
        let registry = ProviderRegistry::from_providers(vec![
            provider("a", ScriptedBackend::new("x", vec![api_error()])),
            provider(
                "b",
                ScriptedBackend::new("x", vec![Err(ProviderError::Timeout(Duration::from_secs(5)))]),
            ),
        ]);
        let graph = FallbackGraph::from_models(&[model("a", Some("b")), model("b", None)], 1)
            .unwrap();
        let orchestrator = FallbackOrchestrator::new(graph);

        let err = run(&orchestrator, &registry, "a").await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
