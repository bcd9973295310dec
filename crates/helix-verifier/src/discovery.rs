//! Discovery phase (§4.5.1): calls `DiscoverModels` on every registered
//! adapter, merges the result with statically configured manual
//! entries, and deduplicates by `(provider_id, model_id)`. A provider
//! whose discovery call fails falls back to its own last-known model
//! list for up to seven days (§4.5 "Failure handling"), after which it
//! drops out of the discovered set until discovery succeeds again.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use helix_core::ModelId;
use helix_registry::Registry;
use parking_lot::RwLock;

const FALLBACK_WINDOW: ChronoDuration = ChronoDuration::days(7);

/// Per-provider memory of the last successful `discover_models()` call,
/// consulted only when the live call fails.
pub struct Discovery {
    last_known: RwLock<HashMap<String, (Vec<ModelId>, DateTime<Utc>)>>,
}

impl Discovery {
    pub fn new() -> Self {
        Self {
            last_known: RwLock::new(HashMap::new()),
        }
    }

    /// Runs discovery across every provider the `Registry` currently
    /// knows about (via `Registry::adapter`, bypassing health gating —
    /// a provider under quarantine still gets re-discovered so it can
    /// earn its way back once healthy), plus the configured manual
    /// entries, returning the deduplicated, sorted union.
    pub async fn run(&self, registry: &Registry, manual: &[(String, ModelId)]) -> Vec<(String, ModelId)> {
        let mut out: BTreeSet<(String, ModelId)> = BTreeSet::new();
        let now = Utc::now();

        for provider_id in registry.provider_ids() {
            let Some(adapter) = registry.adapter(&provider_id) else {
                continue;
            };
            match adapter.discover_models().await {
                Ok(models) => {
                    self.last_known.write().insert(provider_id.clone(), (models.clone(), now));
                    for model in models {
                        out.insert((provider_id.clone(), model));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        provider_id = %provider_id,
                        error = %err,
                        "model discovery failed, falling back to last-known model list"
                    );
                    let fallback = self.last_known.read().get(&provider_id).cloned();
                    if let Some((models, at)) = fallback {
                        if now - at <= FALLBACK_WINDOW {
                            for model in models {
                                out.insert((provider_id.clone(), model));
                            }
                        }
                    }
                }
            }
        }

        for (provider_id, model_id) in manual {
            out.insert((provider_id.clone(), model_id.clone()));
        }

        out.into_iter().collect()
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use helix_core::{Capabilities, CompletionRequest, CompletionResponse, HelixError, ProviderAdapter, StreamChunk};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyAdapter {
        id: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for FlakyAdapter {
        fn provider_id(&self) -> &str {
            self.id
        }
        async fn complete(&self, _r: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
            unimplemented!()
        }
        async fn stream(&self, _r: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
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
        async fn discover_models(&self) -> Result<Vec<String>, HelixError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(vec!["model-a".to_string()])
            } else {
                Err(HelixError::ConnectionFailed("discovery endpoint down".into()))
            }
        }
    }

    #[tokio::test]
    async fn falls_back_to_last_known_models_on_failed_rediscovery() {
        let registry = Registry::new();
        registry.register(Arc::new(FlakyAdapter {
            id: "flaky",
            calls: AtomicUsize::new(0),
        }));
        let discovery = Discovery::new();

        let first = discovery.run(&registry, &[]).await;
        assert_eq!(first, vec![("flaky".to_string(), "model-a".to_string())]);

        let second = discovery.run(&registry, &[]).await;
        assert_eq!(second, first, "discovery call failed but last-known list is within the 7-day window");
    }

    #[tokio::test]
    async fn merges_manual_entries() {
        let registry = Registry::new();
        let discovered = Discovery::new()
            .run(&registry, &[("manual-provider".to_string(), "manual-model".to_string())])
            .await;
        assert_eq!(discovered, vec![("manual-provider".to_string(), "manual-model".to_string())]);
    }
}
