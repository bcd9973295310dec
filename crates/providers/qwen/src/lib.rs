//! Qwen provider adapter (§4.1), speaking Alibaba DashScope's
//! OpenAI-compatible-mode endpoint. Request/response translation
//! delegates to `helix_openai_wire` like every other `chat/completions`
//! vendor; the one genuine quirk — DashScope's `thinking_budget` request
//! field, absent from the OpenAI wire shape — is grounded on the
//! teacher's `Alibaba` config (`qmt-alibaba`), which carries the same
//! field. Since the shared wire builder has no such field, it is spliced
//! into the serialized JSON body after the fact.

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

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct QwenConfig {
    #[schemars(schema_with = "url_schema")]
    #[serde(default = "QwenConfig::default_base_url")]
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
    /// DashScope's reasoning-token budget for `qwen3`-family thinking
    /// models; absent on non-reasoning models.
    pub thinking_budget: Option<u32>,
}

impl QwenConfig {
    pub fn default_base_url() -> Url {
        Url::parse("https://dashscope.aliyuncs.com/compatible-mode/v1/")
            .expect("static URL is valid")
    }
}

pub struct QwenAdapter {
    config: QwenConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl QwenAdapter {
    pub fn new(config: QwenConfig, credential: Credential, client: reqwest::Client) -> Self {
        Self {
            config,
            credential,
            client,
        }
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.timeout_seconds.map(Duration::from_secs)
    }

    /// Splices `thinking_budget` into the already-built wire request's
    /// JSON body, since `helix_openai_wire::WireChatRequest` has no such
    /// field and DashScope is the only vendor in this workspace that
    /// needs it.
    fn with_thinking_budget(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Request<Vec<u8>>, HelixError> {
        let Some(budget) = self.config.thinking_budget else {
            return Ok(request);
        };
        let (parts, body) = request.into_parts();
        let mut value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("thinking_budget".to_string(), serde_json::json!(budget));
        }
        let body = serde_json::to_vec(&value)?;
        Ok(http::Request::from_parts(parts, body))
    }
}

impl OpenAIProviderConfig for QwenAdapter {
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
impl ProviderAdapter for QwenAdapter {
    fn provider_id(&self) -> &str {
        "qwen"
    }

    async fn complete(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<helix_core::CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = openai_chat_request(self, request)?;
            let wire_request = self.with_thinking_budget(wire_request)?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        openai_parse_chat("qwen", response, latency_ms)
    }

    async fn stream(
        &self,
        request: &helix_core::CompletionRequest,
    ) -> Result<BoxStream<'static, helix_core::StreamChunk>, HelixError> {
        let wire_request = openai_chat_request(self, request)?;
        let wire_request = self.with_thinking_budget(wire_request)?;
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
            provider_id: "qwen".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: 131_072,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: model_id.contains("vl"),
            supports_json_mode: true,
            supports_system_role: true,
            modalities: if model_id.contains("vl") {
                vec![Modality::Text, Modality::Image]
            } else {
                vec![Modality::Text]
            },
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("qwen: model must not be empty".into()));
        }
        if self.credential.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("qwen: api_key must not be empty".into()));
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
    use helix_core::{ChatMessage, CompletionRequest, SamplingParams};

    fn test_config() -> QwenConfig {
        QwenConfig {
            base_url: QwenConfig::default_base_url(),
            model: "qwen-max".to_string(),
            max_tokens: None,
            temperature: None,
            system: None,
            timeout_seconds: None,
            top_p: None,
            thinking_budget: Some(4096),
        }
    }

    #[test]
    fn splices_thinking_budget_into_wire_body() {
        let adapter = QwenAdapter::new(test_config(), Credential::new("sk-test"), reqwest::Client::new());
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = openai_chat_request(&adapter, &request).unwrap();
        let wire = adapter.with_thinking_budget(wire).unwrap();
        let body: serde_json::Value = serde_json::from_slice(wire.body()).unwrap();
        assert_eq!(body["thinking_budget"], 4096);
    }

    #[test]
    fn vision_models_report_image_modality() {
        let adapter = QwenAdapter::new(test_config(), Credential::new("sk-test"), reqwest::Client::new());
        let caps = adapter.capabilities("qwen-vl-max");
        assert!(caps.supports_vision);
        assert!(caps.modalities.contains(&Modality::Image));
    }
}
