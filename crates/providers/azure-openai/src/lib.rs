//! Azure OpenAI provider adapter (§4.1). Azure serves the same
//! `chat/completions` JSON body as vanilla OpenAI but reaches it through
//! a deployment-scoped path, a mandatory `api-version` query parameter,
//! and an `api-key` header instead of `Authorization: Bearer` — so this
//! crate reuses `helix_openai_wire`'s request/response translation for
//! the body and then rewrites the transport-specific parts of the
//! built request, rather than re-deriving the whole wire format.

use async_trait::async_trait;
use futures::stream::BoxStream;
use helix_core::{
    Capabilities, Credential, HelixError, Modality, ModelId, ProviderAdapter, RetryPolicy,
};
use helix_openai_wire::{
    openai_chat_request, openai_parse_chat, sse_frames_to_chunks, url_schema, OpenAIProviderConfig,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// `base_url` is the deployment-scoped endpoint, e.g.
/// `https://{resource}.openai.azure.com/openai/deployments/{deployment}/`
/// — there is no sane vendor-wide default, unlike every other
/// OpenAI-wire adapter in this workspace, so it carries no `#[serde(default)]`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AzureOpenAiConfig {
    #[schemars(schema_with = "url_schema")]
    pub base_url: Url,
    pub model: String,
    pub api_version: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
}

pub struct AzureOpenAiAdapter {
    config: AzureOpenAiConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl AzureOpenAiAdapter {
    pub fn new(config: AzureOpenAiConfig, credential: Credential, client: reqwest::Client) -> Self {
        Self {
            config,
            credential,
            client,
        }
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.timeout_seconds.map(Duration::from_secs)
    }

    /// Rewrites a generic OpenAI-wire request for Azure's transport:
    /// appends `?api-version=...` to the URI and swaps the bearer
    /// `Authorization` header for Azure's plain `api-key` header.
    fn adapt_for_azure(&self, request: http::Request<Vec<u8>>) -> Result<http::Request<Vec<u8>>, HelixError> {
        let (mut parts, body) = request.into_parts();

        let mut uri_string = parts.uri.to_string();
        uri_string.push_str(if uri_string.contains('?') { "&" } else { "?" });
        uri_string.push_str("api-version=");
        uri_string.push_str(&self.config.api_version);
        parts.uri = uri_string
            .parse()
            .map_err(|e: http::uri::InvalidUri| HelixError::ConfigError(e.to_string()))?;

        parts.headers.remove(http::header::AUTHORIZATION);
        parts.headers.insert(
            "api-key",
            http::HeaderValue::from_str(self.credential.expose())
                .map_err(|e| HelixError::ConfigError(e.to_string()))?,
        );

        Ok(http::Request::from_parts(parts, body))
    }
}

impl OpenAIProviderConfig for AzureOpenAiAdapter {
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
impl ProviderAdapter for AzureOpenAiAdapter {
    fn provider_id(&self) -> &str {
        "azure-openai"
    }

    async fn complete(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<helix_core::CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = openai_chat_request(self, request)?;
            let wire_request = self.adapt_for_azure(wire_request)?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        openai_parse_chat("azure-openai", response, latency_ms)
    }

    async fn stream(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<BoxStream<'static, helix_core::StreamChunk>, HelixError> {
        let wire_request = openai_chat_request(self, request)?;
        let wire_request = self.adapt_for_azure(wire_request)?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = helix_http::frame_sse(raw);
        Ok(sse_frames_to_chunks(framed))
    }

    async fn health_probe(&self) -> Result<(), HelixError> {
        // Azure's deployments API lists models at the resource scope, not
        // per-deployment; a cheap deployment-scoped liveness check is a
        // zero-token chat completion request instead.
        let request = CompletionRequestProbe::minimal();
        tokio::time::timeout(helix_core::HEALTH_PROBE_TIMEOUT, self.complete(&request))
            .await
            .map_err(|_| HelixError::Timeout)??;
        Ok(())
    }

    fn capabilities(&self, model_id: &str) -> Capabilities {
        Capabilities {
            provider_id: "azure-openai".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: 128_000,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: model_id.contains("vision") || model_id.contains("4o"),
            supports_json_mode: true,
            supports_system_role: true,
            modalities: vec![Modality::Text],
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError(
                "azure-openai: model (deployment name) must not be empty".into(),
            ));
        }
        if self.config.api_version.trim().is_empty() {
            return Err(HelixError::ConfigError(
                "azure-openai: api_version must not be empty".into(),
            ));
        }
        if self.credential.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("azure-openai: api_key must not be empty".into()));
        }
        Ok(())
    }

    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
        // Azure has no per-deployment listing endpoint; the deployment
        // name given at configuration time is the only model this
        // adapter instance can ever serve (§4.1 "may return a static
        // list if the vendor has no model-listing endpoint").
        Ok(vec![self.config.model.clone()])
    }
}

/// Helper constructing the minimal `CompletionRequest` used by
/// `health_probe` above.
struct CompletionRequestProbe;

impl CompletionRequestProbe {
    fn minimal() -> helix_core::CompletionRequest {
        helix_core::CompletionRequest {
            messages: vec![helix_core::ChatMessage::user("ping")],
            tools: None,
            tool_choice: None,
            sampling: helix_core::SamplingParams {
                max_tokens: Some(1),
                ..Default::default()
            },
            stream: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AzureOpenAiConfig {
        AzureOpenAiConfig {
            base_url: Url::parse("https://my-resource.openai.azure.com/openai/deployments/gpt-4o/").unwrap(),
            model: "gpt-4o".to_string(),
            api_version: "2024-08-01-preview".to_string(),
            max_tokens: None,
            temperature: None,
            system: None,
            timeout_seconds: None,
            top_p: None,
        }
    }

    #[test]
    fn adapts_request_to_api_key_header_and_api_version_query() {
        let adapter = AzureOpenAiAdapter::new(test_config(), Credential::new("az-key"), reqwest::Client::new());
        let request = CompletionRequestProbe::minimal();
        let wire = openai_chat_request(&adapter, &request).unwrap();
        let adapted = adapter.adapt_for_azure(wire).unwrap();
        assert!(adapted.uri().to_string().contains("api-version=2024-08-01-preview"));
        assert_eq!(adapted.headers().get("api-key").unwrap(), "az-key");
        assert!(adapted.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn discover_models_returns_the_configured_deployment_only() {
        let adapter = AzureOpenAiAdapter::new(test_config(), Credential::new("az-key"), reqwest::Client::new());
        assert_eq!(adapter.validate_config().is_ok(), true);
    }
}
