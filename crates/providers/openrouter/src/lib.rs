//! OpenRouter provider adapter (§4.1). OpenRouter exposes an OpenAI-compatible
//! `chat/completions` surface, so request building and response parsing
//! delegate entirely to `helix_openai_wire`; this crate supplies only the
//! vendor's config shape, default base URL, static capability knowledge,
//! and the `reqwest`-backed execution of the pure wire requests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use helix_core::{
    Capabilities, Credential, HelixError, Modality, ModelId, ProviderAdapter, RetryPolicy,
};
use helix_openai_wire::{
    openai_chat_request, openai_list_models_request, openai_parse_chat, openai_parse_list_models,
    sse_frames_to_chunks, url_schema, OpenAIProviderConfig,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Host-supplied, `serde`/`schemars`-introspectable OpenRouter configuration
/// (§11 "Configuration surface"): the core never reads env vars itself,
/// a `ConfigSource` collaborator deserializes this and the host wires in
/// the API key via `CredentialProvider`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct OpenRouterConfig {
    #[schemars(schema_with = "url_schema")]
    #[serde(default = "OpenRouterConfig::default_base_url")]
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
}

impl OpenRouterConfig {
    pub fn default_base_url() -> Url {
        Url::parse("https://openrouter.ai/api/v1/").expect("static URL is valid")
    }
}

/// The live adapter: immutable vendor config plus the credential
/// received once at construction (§4.1 "Credential handling") and a
/// shared `reqwest::Client`.
pub struct OpenRouterAdapter {
    config: OpenRouterConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl OpenRouterAdapter {
    pub fn new(config: OpenRouterConfig, credential: Credential, client: reqwest::Client) -> Self {
        Self {
            config,
            credential,
            client,
        }
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.timeout_seconds.map(Duration::from_secs)
    }
}

impl OpenAIProviderConfig for OpenRouterAdapter {
    fn api_key(&self) -> &str {
        self.credential.expose()
    }
    fn base_url(&self) -> &Url {
        &self.config.base_url
    }
    fn model(&self) -> &str {
        &self.config.model
    }
    fn max_tokens(&self) -> Option<&u32> {
        self.config.max_tokens.as_ref()
    }
    fn temperature(&self) -> Option<&f32> {
        self.config.temperature.as_ref()
    }
    fn system(&self) -> Option<&str> {
        self.config.system.as_deref()
    }
    fn timeout_seconds(&self) -> Option<&u64> {
        self.config.timeout_seconds.as_ref()
    }
    fn stream(&self) -> Option<&bool> {
        None
    }
    fn top_p(&self) -> Option<&f32> {
        self.config.top_p.as_ref()
    }
    fn top_k(&self) -> Option<&u32> {
        None
    }
    fn tools(&self) -> Option<&[helix_core::Tool]> {
        None
    }
    fn tool_choice(&self) -> Option<&helix_core::ToolChoice> {
        None
    }
    fn embedding_encoding_format(&self) -> Option<&str> {
        None
    }
    fn embedding_dimensions(&self) -> Option<&u32> {
        None
    }
    fn json_schema(&self) -> Option<&helix_core::StructuredOutputFormat> {
        None
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn provider_id(&self) -> &str {
        "openrouter"
    }

    async fn complete(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<helix_core::CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = openai_chat_request(self, request)?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        openai_parse_chat("openrouter", response, latency_ms)
    }

    async fn stream(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<BoxStream<'static, helix_core::StreamChunk>, HelixError> {
        let wire_request = openai_chat_request(self, request)?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = helix_http::frame_sse(raw);
        Ok(sse_frames_to_chunks(framed))
    }

    async fn health_probe(&self) -> Result<(), HelixError> {
        let request = openai_list_models_request(self)?;
        tokio::time::timeout(
            helix_core::HEALTH_PROBE_TIMEOUT,
            helix_http::execute(&self.client, request, Some(helix_core::HEALTH_PROBE_TIMEOUT)),
        )
        .await
        .map_err(|_| HelixError::Timeout)??;
        Ok(())
    }

    fn capabilities(&self, model_id: &str) -> Capabilities {
        Capabilities {
            provider_id: "openrouter".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: 131072,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: false,
            supports_json_mode: true,
            supports_system_role: true,
            modalities: vec![Modality::Text],
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("openrouter: model must not be empty".into()));
        }
        if self.credential.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("openrouter: api_key must not be empty".into()));
        }
        Ok(())
    }

    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
        let request = openai_list_models_request(self)?;
        let response = helix_http::execute(&self.client, request, self.deadline()).await?;
        openai_parse_list_models(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(model: &str) -> OpenRouterConfig {
        OpenRouterConfig {
            base_url: OpenRouterConfig::default_base_url(),
            model: model.to_string(),
            max_tokens: None,
            temperature: None,
            system: None,
            timeout_seconds: None,
            top_p: None,
        }
    }

    #[test]
    fn validate_config_rejects_empty_model() {
        let adapter = OpenRouterAdapter::new(
            test_config(""),
            Credential::new("test-key"),
            reqwest::Client::new(),
        );
        assert!(adapter.validate_config().is_err());
    }

    #[test]
    fn capabilities_report_provider_id() {
        let adapter = OpenRouterAdapter::new(
            test_config("default-model"),
            Credential::new("test-key"),
            reqwest::Client::new(),
        );
        let caps = adapter.capabilities("default-model");
        assert_eq!(caps.provider_id, "openrouter");
        assert!(caps.supports_streaming);
    }
}
