//! The Verifier Pipeline (§4.5): discovers models across every
//! registered provider, runs the fixed probe battery against each,
//! computes the 5-component score, and selects the top-K models the
//! Registry/Ensemble/Debate end up consuming. Grounded on
//! `querymt::providers::registry`'s fetch-validate-cache-fallback shape
//! for Discovery (§12), generalized to a host-supplied
//! `ModelCatalogSource` rather than a hardcoded endpoint.
//!
//! Depends on `helix-registry` (§2 dependency order places Verifier
//! after Registry/Health) purely to read adapters via
//! `Registry::adapter` — a one-directional dependency matching §9's
//! "Registry ↔ Adapter...acyclic" guidance extended to the Verifier: the
//! Verifier reads from the Registry, the Registry never reaches into
//! the Verifier, and the two are wired together by a host that calls
//! `Registry::update_verified_models` with this crate's output.

pub mod catalog;
pub mod discovery;
pub mod probes;
pub mod scoring;
pub mod selection;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helix_core::{ModelId, ModelSource, Score, VerifiedModel};
use helix_registry::Registry;
use tracing::instrument;

use catalog::{CachedCatalog, ModelCatalogSource, NullCatalogSource};
use discovery::Discovery;

/// Tunables for one `Verifier` instance (§4.5).
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Statically configured `(provider_id, model_id)` pairs merged into
    /// Discovery's result regardless of whether the provider exposes a
    /// listing endpoint (§4.5.1 "manual entries").
    pub manual_models: Vec<(String, ModelId)>,
    /// Top-K selection size, default 5 (§4.5.4).
    pub top_k: usize,
    /// Per-probe bound within the battery (§4.5.2: "within a per-model
    /// timeout" — applied per probe here since each probe is its own
    /// independent bounded prompt).
    pub per_model_probe_timeout: Duration,
    /// Ceiling the `latency` probe and `response_speed` scoring
    /// component both measure against.
    pub latency_budget: Duration,
    /// Providers authenticated via OAuth rather than a static API key,
    /// eligible for the scoring bonus (§4.5.3).
    pub oauth_providers: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            manual_models: Vec::new(),
            top_k: 5,
            per_model_probe_timeout: Duration::from_secs(20),
            latency_budget: Duration::from_secs(5),
            oauth_providers: Vec::new(),
        }
    }
}

/// Drives one discover → verify → score → select cycle against a
/// shared `Registry`. Re-verification/rescoring scheduling (§4.5.5 —
/// full re-verification every 24h, rescoring every 12h, immediate
/// re-probe on breaker close) is the host's responsibility to invoke on
/// a timer or in response to a `HealthEvent`; this type implements one
/// cycle's worth of work plus the monotonic generation counter a
/// `CacheStore` stamps its entries against (SPEC_FULL §13).
pub struct Verifier<C: ModelCatalogSource = NullCatalogSource> {
    registry: Arc<Registry>,
    catalog: CachedCatalog<C>,
    discovery: Discovery,
    config: VerifierConfig,
    generation: AtomicU64,
}

impl Verifier<NullCatalogSource> {
    /// Constructs a Verifier with no model-catalog feed wired in; cost
    /// and recency scoring components degrade to their neutral midpoint
    /// (§12). Use `with_catalog` to supply a real `ModelCatalogSource`.
    pub fn new(registry: Arc<Registry>, config: VerifierConfig) -> Self {
        Self::with_catalog(registry, NullCatalogSource, config)
    }
}

impl<C: ModelCatalogSource> Verifier<C> {
    pub fn with_catalog(registry: Arc<Registry>, catalog: C, config: VerifierConfig) -> Self {
        Self {
            registry,
            catalog: CachedCatalog::new(catalog),
            discovery: Discovery::new(),
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Monotonic counter bumped once per full re-verification cycle
    /// (§4.5.5), used to stamp `CacheStore` entries (SPEC_FULL §13: a
    /// host's cache invalidates entries whose stamp predates this).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Full cycle: Discovery → Verification (probe battery) → Scoring →
    /// Selection. The caller hands the result to
    /// `Registry::update_verified_models` itself — the Verifier never
    /// writes to the Registry directly.
    #[instrument(skip(self))]
    pub async fn run_full_cycle(&self) -> Vec<VerifiedModel> {
        let discovered = self.discovery.run(&self.registry, &self.config.manual_models).await;
        tracing::info!(count = discovered.len(), "verifier discovery phase complete");

        let pricing = self.catalog.pricing().await;
        let catalog_entries = self.catalog.catalog().await;

        let mut scored = Vec::with_capacity(discovered.len());
        for (provider_id, model_id) in discovered {
            let Some(adapter) = self.registry.adapter(&provider_id) else {
                continue;
            };
            let caps = adapter.capabilities(&model_id);
            let report = probes::run_battery(adapter.as_ref(), caps.supports_tools, &self.config).await;
            let oauth = self.config.oauth_providers.iter().any(|p| p == &provider_id);
            let verification = report.to_verification();

            let score = if verification.is_verified() {
                let release_date = catalog_entries
                    .iter()
                    .find(|c| c.provider_id == provider_id && c.model_id == model_id)
                    .and_then(|c| c.release_date);
                let model_pricing = pricing
                    .iter()
                    .find(|p| p.provider_id == provider_id && p.model_id == model_id);
                scoring::compute(&caps, &report, model_pricing, release_date, oauth)
            } else {
                tracing::warn!(
                    provider_id = %provider_id,
                    model_id = %model_id,
                    "verification failed this cycle, score demoted to zero"
                );
                Score::zeroed()
            };

            scored.push(VerifiedModel {
                capabilities: caps,
                verification,
                score,
                source: ModelSource::Discovery,
            });
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        selection::select_top_k(scored, self.config.top_k)
    }

    /// §4.5.5 "score recomputation every 12h": re-derives scores for
    /// already-verified models from fresh catalog/pricing data without
    /// re-running the probe battery, then reselects top-K. Models that
    /// failed verification in the last full cycle stay at a zero score
    /// (re-verification, not rescoring, is what can revive them). Does
    /// not advance `generation` — only `run_full_cycle` does that.
    #[instrument(skip(self, previous))]
    pub async fn rescore(&self, previous: Vec<VerifiedModel>) -> Vec<VerifiedModel> {
        let pricing = self.catalog.pricing().await;
        let catalog_entries = self.catalog.catalog().await;

        let rescored: Vec<VerifiedModel> = previous
            .into_iter()
            .map(|mut model| {
                if !model.verification.is_verified() {
                    return model;
                }
                let oauth = self
                    .config
                    .oauth_providers
                    .iter()
                    .any(|p| p == &model.capabilities.provider_id);
                let release_date = catalog_entries
                    .iter()
                    .find(|c| {
                        c.provider_id == model.capabilities.provider_id
                            && c.model_id == model.capabilities.model_id
                    })
                    .and_then(|c| c.release_date);
                let model_pricing = pricing.iter().find(|p| {
                    p.provider_id == model.capabilities.provider_id
                        && p.model_id == model.capabilities.model_id
                });
                let report = probes::ProbeReport {
                    passed_tests: model.verification.passed_tests.clone(),
                    code_visible: model.verification.code_visible,
                    latency_ms: None,
                    completion_tokens: None,
                };
                model.score = scoring::compute(&model.capabilities, &report, model_pricing, release_date, oauth);
                model
            })
            .collect();

        selection::select_top_k(rescored, self.config.top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use helix_core::{Capabilities, ChatMessage, CompletionRequest, CompletionResponse, HelixError, Modality, ProviderAdapter, StreamChunk, Usage};

    struct StubAdapter;

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn provider_id(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
            let prompt = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
            let mut message = if prompt.contains("is_even") {
                ChatMessage::assistant("fn is_even(n: i32) -> bool { n % 2 == 0 }")
            } else if prompt.contains("panics") {
                ChatMessage::assistant("The bug is an index out of bounds access at `values[i + 1]`.")
            } else if request.tools.is_some() {
                ChatMessage::assistant("")
            } else {
                ChatMessage::assistant(
                    "I see a Rust function named greet that formats a greeting string.",
                )
            };
            let mut finish_reason = helix_core::FinishReason::Stop;
            if request.tools.is_some() {
                message.tool_calls = Some(vec![helix_core::ToolCall {
                    id: "call-1".to_string(),
                    call_type: "function".to_string(),
                    function: helix_core::FunctionCall {
                        name: "get_weather".to_string(),
                        arguments: "{\"city\":\"Paris\"}".to_string(),
                    },
                }]);
                finish_reason = helix_core::FinishReason::ToolCalls;
            }
            Ok(CompletionResponse {
                id: "cmpl-1".to_string(),
                created_at: chrono::Utc::now(),
                model_id: "stub-model".to_string(),
                provider_id: "stub".to_string(),
                choices: vec![helix_core::Choice {
                    index: 0,
                    message,
                    finish_reason,
                }],
                usage: Usage {
                    prompt_tokens: 20,
                    completion_tokens: 180,
                    total_tokens: 200,
                },
                latency_ms: 120,
                quality_score: None,
            })
        }

        async fn stream(&self, _request: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
            use futures::stream;
            Ok(Box::pin(stream::iter(vec![StreamChunk {
                id: "cmpl-1".to_string(),
                index: 0,
                delta: helix_core::Delta {
                    role: None,
                    content: Some("one two three".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some(helix_core::FinishReason::Stop),
                error: None,
            }])))
        }

        async fn health_probe(&self) -> Result<(), HelixError> {
            Ok(())
        }

        fn capabilities(&self, model_id: &str) -> Capabilities {
            Capabilities {
                provider_id: "stub".to_string(),
                model_id: model_id.to_string(),
                max_context_tokens: 128_000,
                supports_streaming: true,
                supports_tools: true,
                supports_vision: false,
                supports_json_mode: false,
                supports_system_role: true,
                modalities: vec![Modality::Text],
                updated_at: chrono::Utc::now(),
            }
        }

        fn validate_config(&self) -> Result<(), HelixError> {
            Ok(())
        }

        async fn discover_models(&self) -> Result<Vec<String>, HelixError> {
            Ok(vec!["stub-model".to_string()])
        }
    }

    #[tokio::test]
    async fn full_cycle_verifies_and_selects_a_responsive_stub_model() {
        let registry = Arc::new(Registry::new());
        registry.register(Arc::new(StubAdapter));
        let verifier = Verifier::new(
            registry,
            VerifierConfig {
                top_k: 5,
                ..Default::default()
            },
        );

        let selected = verifier.run_full_cycle().await;
        assert_eq!(selected.len(), 1);
        assert!(selected[0].verification.code_visible);
        assert_eq!(verifier.generation(), 1);
    }

    #[tokio::test]
    async fn second_full_cycle_bumps_generation_again() {
        let registry = Arc::new(Registry::new());
        registry.register(Arc::new(StubAdapter));
        let verifier = Verifier::new(registry, VerifierConfig::default());
        verifier.run_full_cycle().await;
        verifier.run_full_cycle().await;
        assert_eq!(verifier.generation(), 2);
    }
}
