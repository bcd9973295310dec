//! Interfaces the core consumes from components explicitly out of scope
//! (§1, §6): configuration loading, credential storage, metrics
//! exposition, transcript persistence, and response caching. HelixAgent
//! never implements these traits itself — a host binary wires in
//! whatever `ConfigSource`/`MetricsSink`/etc. fits its deployment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::debate::DebateSession;
use crate::error::HelixError;
use crate::request::CompletionRequest;
use crate::response::CompletionResponse;

/// Provider configuration plus ensemble/debate/verifier defaults, as
/// handed to the core at startup and on reload signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelixConfig {
    pub providers: Vec<ProviderConfig>,
    pub ensemble_defaults: serde_json::Value,
    pub debate_defaults: serde_json::Value,
    pub verifier_schedule: serde_json::Value,
}

/// Yields configuration at startup and on reload signals. Implemented by
/// a host's file/env/remote config layer; out of scope here.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<HelixConfig, HelixError>;
}

/// Supplies per-provider credentials, callable at adapter-construction
/// time and during OAuth refresh.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get(&self, provider_id: &str) -> Result<crate::credential::Credential, HelixError>;
}

/// Non-blocking metrics sink; failures must never fail the request that
/// triggered the recording.
pub trait MetricsSink: Send + Sync {
    fn record_counter(&self, name: &str, labels: &[(&str, &str)], value: u64);
    fn record_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn record_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Optional debate transcript persistence; called after session
/// termination. Failure is logged by the caller, never surfaced.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn persist_debate(&self, session: &DebateSession) -> Result<(), HelixError>;
}

/// Optional response cache keyed by `CompletionRequest::fingerprint()`.
/// Entries are stamped with the Verifier generation active when they
/// were written (§9 Open Question resolution, SPEC_FULL §13); a host
/// implementation is expected to invalidate entries whose
/// `verifier_generation` predates the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: CompletionResponse,
    pub verifier_generation: u64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, HelixError>;
    async fn set(
        &self,
        fingerprint: &str,
        entry: CacheEntry,
        ttl: Duration,
    ) -> Result<(), HelixError>;
}

/// Whether a request is eligible for a `CacheStore` lookup at all —
/// shared logic so every caller (ensemble, debate, a future direct-model
/// path) applies the same rule from `CompletionRequest::is_cacheable`.
pub fn cache_lookup_key(request: &CompletionRequest) -> Option<String> {
    request.is_cacheable().then(|| request.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::request::SamplingParams;

    #[test]
    fn non_deterministic_requests_have_no_cache_key() {
        let req = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams {
                temperature: Some(0.7),
                ..Default::default()
            },
            stream: false,
        };
        assert!(cache_lookup_key(&req).is_none());
    }
}
