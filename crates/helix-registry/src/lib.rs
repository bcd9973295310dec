//! The Provider Registry & Health state machine (§4.2): the one
//! process-wide singleton in this workspace (§9 "Global state"). Owns
//! every configured adapter, its `HealthState`/`CircuitBreaker`, and the
//! Verifier's latest `VerifiedModel` annotations, and hands out
//! short-lived `ProviderRef`s to the Ensemble/Debate for the duration of
//! one request. The Registry never calls back into an adapter on its own
//! initiative, and an adapter never references the Registry back (§9
//! "Cyclic references").

pub mod health;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use helix_core::{HealthState, HealthWindow, ProviderAdapter, VerifiedModel};
use parking_lot::RwLock;
use tracing::instrument;

use health::{BreakerConfig, Outcome, ProviderHealth};

/// How `Select` should order its returned candidates when more than one
/// satisfies the required capability bits (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOrdering {
    Score,
    Latency,
    Cost,
}

/// Capability and model-id constraints a caller places on `Select`.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub requires_streaming: bool,
    pub requires_tools: bool,
    pub requires_vision: bool,
    pub requires_json_mode: bool,
    /// Restrict to a specific `(provider_id, model_id)`; `None` considers
    /// every verified model across every registered provider.
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub ordering: Option<SelectionOrdering>,
}

/// A short-lived handle to one verified `(provider, model)` pair, valid
/// for the duration of a single request (§3 Lifecycles). Cloning is
/// cheap: the adapter is shared via `Arc`.
#[derive(Clone)]
pub struct ProviderRef {
    pub provider_id: String,
    pub model_id: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub verified: VerifiedModel,
}

/// A health-state transition event, delivered to `Subscribe` callbacks
/// for observability collaborators (§4.2).
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub provider_id: String,
    pub from: HealthState,
    pub to: HealthState,
    pub at: chrono::DateTime<Utc>,
}

type HealthCallback = Box<dyn Fn(&HealthEvent) + Send + Sync>;

struct RegisteredProvider {
    adapter: Arc<dyn ProviderAdapter>,
    health: ProviderHealth,
}

/// The authoritative, process-wide set of configured adapters plus their
/// live health/breaker state and the Verifier's latest scoring. One
/// instance is constructed explicitly at startup and a handle passed
/// into the Ensemble/Debate/Verifier constructors (§9); there is no
/// ambient module-level singleton.
pub struct Registry {
    providers: DashMap<String, Arc<RegisteredProvider>>,
    /// Keyed by `"{provider_id}/{model_id}"`.
    verified_models: DashMap<String, VerifiedModel>,
    subscribers: RwLock<Vec<HealthCallback>>,
    breaker_config: BreakerConfig,
}

fn verified_key(provider_id: &str, model_id: &str) -> String {
    format!("{provider_id}/{model_id}")
}

impl Registry {
    pub fn new() -> Self {
        Self::with_breaker_config(BreakerConfig::default())
    }

    pub fn with_breaker_config(breaker_config: BreakerConfig) -> Self {
        Self {
            providers: DashMap::new(),
            verified_models: DashMap::new(),
            subscribers: RwLock::new(Vec::new()),
            breaker_config,
        }
    }

    /// Registers a configured adapter under its `provider_id`, starting
    /// it `Healthy` with a closed breaker. Called once at startup per
    /// adapter the host's `ConfigSource` yields.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let provider_id = adapter.provider_id().to_string();
        self.providers.insert(
            provider_id,
            Arc::new(RegisteredProvider {
                adapter,
                health: ProviderHealth::new(self.breaker_config),
            }),
        );
    }

    pub fn deregister(&self, provider_id: &str) {
        self.providers.remove(provider_id);
        self.verified_models.retain(|k, _| !k.starts_with(&format!("{provider_id}/")));
    }

    /// Replaces the Verifier's scoring table. Called after each
    /// verification/rescoring cycle (§4.5.5); entries absent from the
    /// new set are dropped, matching "models below threshold are
    /// excluded" and "discovery failures fall back to last-known list"
    /// being the Verifier's responsibility, not the Registry's.
    pub fn update_verified_models(&self, models: Vec<VerifiedModel>) {
        self.verified_models.clear();
        for model in models {
            let key = verified_key(&model.capabilities.provider_id, &model.capabilities.model_id);
            self.verified_models.insert(key, model);
        }
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Raw adapter lookup, bypassing health/breaker gating entirely.
    /// Unlike `select`, this is not request-facing: it exists solely for
    /// `helix-verifier`, which must be able to probe a provider's adapter
    /// directly to (re)build the `VerifiedModel` table `select` reads
    /// from (§4.5). No other caller in this workspace should use it.
    pub fn adapter(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(provider_id).map(|p| Arc::clone(&p.adapter))
    }

    /// Registers a callback invoked on every health-state transition
    /// (§4.2 `Subscribe`). Callbacks run synchronously on the thread that
    /// recorded the outcome; keep them cheap and non-blocking.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&HealthEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Box::new(callback));
    }

    /// Returns candidate `ProviderRef`s satisfying `criteria`, restricted
    /// to providers whose breaker is `Closed` or `HalfOpen` (invariant b,
    /// §3) and whose capability record is fresh (invariant a) and whose
    /// `VerifiedModel` clears the minimum selectable score (§4.5.3).
    /// Ordered per `criteria.ordering` (default `Score`, descending).
    #[instrument(skip_all, fields(ordering = ?criteria.ordering))]
    pub fn select(&self, criteria: &SelectionCriteria) -> Vec<ProviderRef> {
        let now = Utc::now();
        let mut refs: Vec<ProviderRef> = Vec::new();

        for entry in self.verified_models.iter() {
            let verified = entry.value();
            if !verified.score.is_selectable() {
                continue;
            }
            if verified.capabilities.is_stale(now) {
                continue;
            }
            if let Some(wanted) = &criteria.provider_id {
                if &verified.capabilities.provider_id != wanted {
                    continue;
                }
            }
            if let Some(wanted) = &criteria.model_id {
                if &verified.capabilities.model_id != wanted {
                    continue;
                }
            }
            if criteria.requires_streaming && !verified.capabilities.supports_streaming {
                continue;
            }
            if criteria.requires_tools && !verified.capabilities.supports_tools {
                continue;
            }
            if criteria.requires_vision && !verified.capabilities.supports_vision {
                continue;
            }
            if criteria.requires_json_mode && !verified.capabilities.supports_json_mode {
                continue;
            }

            let Some(registered) = self.providers.get(&verified.capabilities.provider_id) else {
                continue;
            };
            if !registered.health.circuit_state().is_selectable() {
                continue;
            }

            refs.push(ProviderRef {
                provider_id: verified.capabilities.provider_id.clone(),
                model_id: verified.capabilities.model_id.clone(),
                adapter: Arc::clone(&registered.adapter),
                verified: verified.clone(),
            });
        }

        let window_latency = |provider_id: &str| -> f64 {
            self.providers
                .get(provider_id)
                .map(|p| p.health.window_snapshot().latency_p50_ms)
                .unwrap_or(f64::MAX)
        };

        match criteria.ordering.unwrap_or(SelectionOrdering::Score) {
            SelectionOrdering::Score => refs.sort_by(|a, b| {
                b.verified
                    .score
                    .overall_0_10
                    .partial_cmp(&a.verified.score.overall_0_10)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.provider_id.cmp(&b.provider_id))
            }),
            SelectionOrdering::Latency => refs.sort_by(|a, b| {
                window_latency(&a.provider_id)
                    .partial_cmp(&window_latency(&b.provider_id))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.provider_id.cmp(&b.provider_id))
            }),
            SelectionOrdering::Cost => refs.sort_by(|a, b| {
                b.verified
                    .score
                    .cost
                    .partial_cmp(&a.verified.score.cost)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.provider_id.cmp(&b.provider_id))
            }),
        }

        refs
    }

    /// Records one call outcome against a provider's sliding window and
    /// breaker, firing subscriber callbacks on any resulting health
    /// transition. Held locks never span the network call itself — the
    /// caller invokes this only after the adapter call has already
    /// completed (§5 "no global lock spans a network call").
    #[instrument(skip(self), fields(provider_id))]
    pub fn record(&self, provider_id: &str, outcome: Outcome, latency_ms: u64) {
        let Some(registered) = self.providers.get(provider_id) else {
            return;
        };
        if let Some((from, to)) = registered.health.record(outcome, latency_ms) {
            tracing::info!(provider_id, ?from, ?to, "provider health transition");
            let event = HealthEvent {
                provider_id: provider_id.to_string(),
                from,
                to,
                at: Utc::now(),
            };
            for callback in self.subscribers.read().iter() {
                callback(&event);
            }
        }
    }

    /// Whether a provider call would currently be admitted (breaker not
    /// `Open`), without recording anything. Useful for a caller deciding
    /// whether to attempt a provider at all before building a request.
    pub fn try_admit(&self, provider_id: &str) -> bool {
        self.providers
            .get(provider_id)
            .map(|p| p.health.try_admit())
            .unwrap_or(false)
    }

    pub fn health_state(&self, provider_id: &str) -> Option<HealthState> {
        self.providers.get(provider_id).map(|p| p.health.state())
    }

    pub fn health_window(&self, provider_id: &str) -> Option<HealthWindow> {
        self.providers.get(provider_id).map(|p| p.health.window_snapshot())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc as ChronoUtc;
    use futures::stream::BoxStream;
    use helix_core::{
        Capabilities, CompletionRequest, CompletionResponse, HelixError, ModelId, ModelSource,
        Score, StreamChunk, Verification,
    };
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FakeAdapter {
        id: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider_id(&self) -> &str {
            self.id
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
            unimplemented!()
        }

        async fn stream(
            &self,
            _request: &CompletionRequest,
        ) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
            unimplemented!()
        }

        async fn health_probe(&self) -> Result<(), HelixError> {
            Ok(())
        }

        fn capabilities(&self, _model_id: &str) -> Capabilities {
            unimplemented!()
        }

        fn validate_config(&self) -> Result<(), HelixError> {
            Ok(())
        }

        async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
            Ok(vec![])
        }
    }

    fn verified_for(provider_id: &str, model_id: &str, overall: f32) -> VerifiedModel {
        VerifiedModel {
            capabilities: Capabilities {
                provider_id: provider_id.to_string(),
                model_id: model_id.to_string(),
                max_context_tokens: 128_000,
                supports_streaming: true,
                supports_tools: true,
                supports_vision: false,
                supports_json_mode: true,
                supports_system_role: true,
                modalities: vec![],
                updated_at: ChronoUtc::now(),
            },
            verification: Verification {
                passed_tests: vec!["existence".into(), "responsiveness".into()],
                code_visible: true,
                probed_at: ChronoUtc::now(),
            },
            score: Score::compute(overall, overall, overall, overall, overall, false),
            source: ModelSource::Discovery,
        }
    }

    #[test]
    fn select_excludes_open_breaker_providers() {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter { id: "a" }));
        registry.update_verified_models(vec![verified_for("a", "model-1", 8.0)]);

        assert_eq!(registry.select(&SelectionCriteria::default()).len(), 1);

        for _ in 0..10 {
            registry.record("a", Outcome::Failure(helix_core::ErrorKind::Timeout), 10);
        }

        assert!(registry.select(&SelectionCriteria::default()).is_empty());
    }

    #[test]
    fn select_excludes_below_threshold_scores() {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter { id: "a" }));
        registry.update_verified_models(vec![verified_for("a", "model-1", 2.0)]);
        assert!(registry.select(&SelectionCriteria::default()).is_empty());
    }

    #[test]
    fn select_orders_by_score_descending() {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter { id: "a" }));
        registry.register(Arc::new(FakeAdapter { id: "b" }));
        registry.update_verified_models(vec![
            verified_for("a", "model-1", 6.0),
            verified_for("b", "model-1", 9.0),
        ]);
        let refs = registry.select(&SelectionCriteria::default());
        assert_eq!(refs[0].provider_id, "b");
        assert_eq!(refs[1].provider_id, "a");
    }

    #[test]
    fn subscribers_observe_health_transitions() {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter { id: "a" }));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        registry.subscribe(move |_event| {
            seen2.fetch_add(1, AtomicOrdering::SeqCst);
        });
        for _ in 0..10 {
            registry.record("a", Outcome::Failure(helix_core::ErrorKind::Timeout), 10);
        }
        assert!(seen.load(AtomicOrdering::SeqCst) > 0);
    }

    #[test]
    fn deregister_drops_provider_and_its_verified_models() {
        let registry = Registry::new();
        registry.register(Arc::new(FakeAdapter { id: "a" }));
        registry.update_verified_models(vec![verified_for("a", "model-1", 8.0)]);
        registry.deregister("a");
        assert!(registry.select(&SelectionCriteria::default()).is_empty());
        assert!(!registry.try_admit("a"));
    }
}
