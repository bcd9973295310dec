//! A `models.dev`-style feed of provider/model metadata and per-model
//! pricing (§12 "Provider model-discovery cache", "Pricing-aware cost
//! scoring"). Grounded on `querymt::providers::registry` and
//! `querymt::pricing`'s fetch-validate-cache-fallback shape, generalized
//! from a hardcoded endpoint + on-disk file cache to a collaborator
//! trait + in-memory cache: the core may not always have outbound
//! network or filesystem access in test (§11).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use helix_core::{HelixError, ModelId};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogModel {
    pub provider_id: String,
    pub model_id: ModelId,
    pub release_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub provider_id: String,
    pub model_id: ModelId,
    pub prompt_cost_per_million: f64,
    pub completion_cost_per_million: f64,
}

/// Host-supplied source for the provider/model metadata feed and its
/// pricing companion. Implemented by a host's HTTP client the same way
/// `CredentialProvider`/`ConfigSource` are (§6); the Verifier never
/// reaches for a hardcoded URL itself.
#[async_trait]
pub trait ModelCatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogModel>, HelixError>;
    async fn fetch_pricing(&self) -> Result<Vec<ModelPricing>, HelixError>;
}

/// A catalog source with nothing to report. The Verifier degrades
/// gracefully to neutral recency/cost scores when no host-supplied feed
/// is wired in, rather than failing a verification cycle outright.
pub struct NullCatalogSource;

#[async_trait]
impl ModelCatalogSource for NullCatalogSource {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogModel>, HelixError> {
        Ok(Vec::new())
    }

    async fn fetch_pricing(&self) -> Result<Vec<ModelPricing>, HelixError> {
        Ok(Vec::new())
    }
}

struct CacheSlot<T> {
    value: Vec<T>,
    fetched_at: DateTime<Utc>,
}

/// 24h freshness TTL, 7-day stale-fallback window — identical constants
/// to the teacher's `CACHE_DURATION` and this crate's Discovery fallback
/// (§4.5 "Discovery failures fall back to the last-known model list for
/// up to 7 days").
const FRESH_FOR: ChronoDuration = ChronoDuration::hours(24);
const STALE_FALLBACK_FOR: ChronoDuration = ChronoDuration::days(7);

/// Wraps a `ModelCatalogSource` with the fetch-validate-cache-fallback
/// discipline: a fresh cache entry is served without a network call; an
/// expired one triggers a refetch; a refetch failure falls back to the
/// last successful fetch for up to seven days before giving up and
/// returning an empty catalog.
pub struct CachedCatalog<S> {
    source: S,
    catalog: RwLock<Option<CacheSlot<CatalogModel>>>,
    pricing: RwLock<Option<CacheSlot<ModelPricing>>>,
}

impl<S: ModelCatalogSource> CachedCatalog<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            catalog: RwLock::new(None),
            pricing: RwLock::new(None),
        }
    }

    pub async fn catalog(&self) -> Vec<CatalogModel> {
        if let Some(slot) = self.catalog.read().as_ref() {
            if Utc::now() - slot.fetched_at < FRESH_FOR {
                return slot.value.clone();
            }
        }
        match self.source.fetch_catalog().await {
            Ok(value) => {
                let now = Utc::now();
                *self.catalog.write() = Some(CacheSlot { value: value.clone(), fetched_at: now });
                value
            }
            Err(err) => {
                tracing::warn!(error = %err, "model catalog fetch failed, falling back to cached copy");
                self.stale_or_empty(&self.catalog)
            }
        }
    }

    pub async fn pricing(&self) -> Vec<ModelPricing> {
        if let Some(slot) = self.pricing.read().as_ref() {
            if Utc::now() - slot.fetched_at < FRESH_FOR {
                return slot.value.clone();
            }
        }
        match self.source.fetch_pricing().await {
            Ok(value) => {
                let now = Utc::now();
                *self.pricing.write() = Some(CacheSlot { value: value.clone(), fetched_at: now });
                value
            }
            Err(err) => {
                tracing::warn!(error = %err, "model pricing fetch failed, falling back to cached copy");
                self.stale_or_empty(&self.pricing)
            }
        }
    }

    fn stale_or_empty<T: Clone>(&self, slot: &RwLock<Option<CacheSlot<T>>>) -> Vec<T> {
        match slot.read().as_ref() {
            Some(entry) if Utc::now() - entry.fetched_at < STALE_FALLBACK_FOR => entry.value.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyAfterOne {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelCatalogSource for FlakyAfterOne {
        async fn fetch_catalog(&self) -> Result<Vec<CatalogModel>, HelixError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(vec![CatalogModel {
                    provider_id: "claude".into(),
                    model_id: "claude-3-5-sonnet".into(),
                    release_date: Some(Utc::now()),
                }])
            } else {
                Err(HelixError::ConnectionFailed("down".into()))
            }
        }

        async fn fetch_pricing(&self) -> Result<Vec<ModelPricing>, HelixError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn falls_back_to_last_known_catalog_on_refetch_failure() {
        let cached = CachedCatalog::new(FlakyAfterOne { calls: AtomicUsize::new(0) });
        let first = cached.catalog().await;
        assert_eq!(first.len(), 1);

        // Force staleness by overwriting the cached fetch time.
        {
            let mut guard = cached.catalog.write();
            if let Some(slot) = guard.as_mut() {
                slot.fetched_at = Utc::now() - ChronoDuration::hours(25);
            }
        }
        let second = cached.catalog().await;
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn null_source_reports_empty_catalog_and_pricing() {
        let cached = CachedCatalog::new(NullCatalogSource);
        assert!(cached.catalog().await.is_empty());
        assert!(cached.pricing().await.is_empty());
    }
}
