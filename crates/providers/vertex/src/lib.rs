//! Vertex AI provider adapter (§4.1), speaking Google's Vertex AI
//! `generateContent` API — the same `contents`/`parts`/`functionCall`
//! wire shape as the Generative Language API the `gemini` crate talks
//! to, grounded on that adapter's wire module, but reached through a
//! project/location-scoped endpoint and authenticated with a refreshed
//! OAuth bearer token rather than a query-string API key.
//!
//! Credential handling is the one thing this adapter does that no other
//! bespoke-wire adapter needs: Vertex access tokens expire (typically
//! within the hour), so every request must first ensure a live one.
//! `refresh_lock` gates that refresh behind a `tokio::sync::Mutex`
//! rather than `parking_lot`'s — holding it across the `.await` of the
//! token-endpoint call is the point, so a second caller that arrives
//! while a refresh is already in flight waits for that one refresh to
//! land instead of starting its own (grounded on the teacher's
//! `TokenRefresher`/`TokenSet` shape in `agent/src/auth/provider.rs`,
//! generalized from its anthropic/openai OAuth apps to Google's token
//! endpoint). The refresh itself is a plain `reqwest` POST against
//! `https://oauth2.googleapis.com/token` with the standard
//! `refresh_token` grant — deliberately not `yup-oauth2`, which drags in
//! its own credential-file format and hyper version pin this workspace
//! doesn't otherwise need.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use helix_core::{
    ApiError, Capabilities, ChatMessage, ChatRole, Choice, CompletionRequest, CompletionResponse,
    Credential, Delta, FinishReason, FunctionCall, HelixError, Modality, ModelId, ProviderAdapter,
    RetryPolicy, StreamChunk, Tool, ToolCall, Usage,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct VertexConfig {
    /// GCP project ID hosting the Vertex AI endpoint.
    pub project_id: String,
    /// Region, e.g. `us-central1`.
    pub location: String,
    /// Publisher model ID, e.g. `gemini-1.5-pro`.
    pub model: String,
    /// OAuth client ID the refresh token was issued under.
    pub oauth_client_id: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl VertexConfig {
    fn endpoint(&self, operation: &str) -> String {
        format!(
            "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:{op}",
            loc = self.location,
            proj = self.project_id,
            model = self.model,
            op = operation,
        )
    }
}

/// An access token minted from the most recent refresh, plus the moment
/// it stops being safe to reuse.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// A token within this many seconds of its stated expiry is treated as
/// already expired, so a request never races a server-side cutoff.
const EXPIRY_SKEW: chrono::Duration = chrono::Duration::seconds(60);

pub struct VertexAdapter {
    config: VertexConfig,
    /// The long-lived refresh token; never sent on a chat request
    /// itself, only to the token endpoint.
    refresh_token: Credential,
    oauth_client_secret: Credential,
    client: reqwest::Client,
    cached_token: Mutex<Option<CachedToken>>,
}

impl VertexAdapter {
    pub fn new(
        config: VertexConfig,
        refresh_token: Credential,
        oauth_client_secret: Credential,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            refresh_token,
            oauth_client_secret,
            client,
            cached_token: Mutex::new(None),
        }
    }

    fn deadline(&self) -> Option<Duration> {
        self.config.timeout_seconds.map(Duration::from_secs)
    }

    /// Returns a live bearer token, refreshing it first if the cached
    /// one is missing or within `EXPIRY_SKEW` of expiring. The mutex is
    /// held across the refresh call itself so concurrent callers
    /// converge on a single in-flight refresh rather than each firing
    /// their own request at Google's token endpoint.
    async fn bearer_token(&self) -> Result<String, HelixError> {
        let mut guard = self.cached_token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Utc::now() > EXPIRY_SKEW {
                return Ok(cached.access_token.clone());
            }
        }

        #[derive(Serialize)]
        struct RefreshForm<'a> {
            grant_type: &'a str,
            refresh_token: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
        }
        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
            expires_in: i64,
        }

        let form = RefreshForm {
            grant_type: "refresh_token",
            refresh_token: self.refresh_token.expose(),
            client_id: &self.config.oauth_client_id,
            client_secret: self.oauth_client_secret.expose(),
        };
        let response = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&form)
            .send()
            .await
            .map_err(|e| HelixError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                400 | 401 => HelixError::AuthFailed(body),
                _ => HelixError::InternalProviderError(body),
            });
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
        let fresh = CachedToken {
            access_token: parsed.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        };
        *guard = Some(fresh);
        Ok(parsed.access_token)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart<'a> {
    #[serde(rename = "text")]
    Text(&'a str),
    #[serde(rename = "functionCall")]
    FunctionCall(WireFunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(WireFunctionResponse),
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize)]
struct WireFunctionResponse {
    name: String,
    response: WireFunctionResponseContent,
}

#[derive(Serialize)]
struct WireFunctionResponseContent {
    name: String,
    content: Value,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'a str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

fn vertex_body(adapter: &VertexAdapter, request: &CompletionRequest) -> Result<Vec<u8>, HelixError> {
    let mut contents = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &adapter.config.system {
        contents.push(WireContent {
            role: "user",
            parts: vec![WirePart::Text(system)],
        });
    }

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::User => {
                contents.push(WireContent {
                    role: "user",
                    parts: vec![WirePart::Text(&message.content)],
                });
            }
            ChatRole::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(WirePart::Text(&message.content));
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        parts.push(WirePart::FunctionCall(WireFunctionCall {
                            name: call.function.name.clone(),
                            args: serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null),
                        }));
                    }
                }
                contents.push(WireContent { role: "model", parts });
            }
            ChatRole::Tool => {
                let name = message.name.clone().unwrap_or_default();
                let parsed = serde_json::from_str::<Value>(&message.content).unwrap_or(Value::Null);
                contents.push(WireContent {
                    role: "function",
                    parts: vec![WirePart::FunctionResponse(WireFunctionResponse {
                        name: name.clone(),
                        response: WireFunctionResponseContent { name, content: parsed },
                    })],
                });
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools: &Vec<Tool>| {
        vec![WireTool {
            function_declarations: tools
                .iter()
                .map(|t| WireFunctionDeclaration {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect(),
        }]
    });

    let body = WireRequest {
        contents,
        generation_config: Some(WireGenerationConfig {
            max_output_tokens: request.sampling.max_tokens.or(adapter.config.max_tokens),
            temperature: request.sampling.temperature.or(adapter.config.temperature),
            top_p: request.sampling.top_p.or(adapter.config.top_p),
            top_k: adapter.config.top_k,
        }),
        tools,
    };

    serde_json::to_vec(&body).map_err(HelixError::from)
}

async fn vertex_request(
    adapter: &VertexAdapter,
    request: &CompletionRequest,
    operation: &str,
) -> Result<http::Request<Vec<u8>>, HelixError> {
    let body = vertex_body(adapter, request)?;
    let token = adapter.bearer_token().await?;
    http::Request::builder()
        .method(http::Method::POST)
        .uri(adapter.config.endpoint(operation))
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .body(body)
        .map_err(HelixError::from)
}

#[derive(Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: String,
    #[serde(rename = "functionCall")]
    function_call: Option<WireFunctionCallResponse>,
}

#[derive(Deserialize)]
struct WireFunctionCallResponse {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct WireResponseContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: WireResponseContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
}

fn parse_finish_reason(raw: Option<&str>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match raw {
        Some("STOP") | None => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn wire_http_error(response: &http::Response<Vec<u8>>) -> HelixError {
    let status = response.status().as_u16();
    let message = serde_json::from_slice::<Value>(response.body())
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str().map(str::to_string)))
        .unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        401 | 403 => HelixError::AuthFailed(message),
        429 => HelixError::RateLimited { retry_after_ms: None },
        400 => HelixError::BadRequest(message),
        503 => HelixError::Overloaded(message),
        500..=599 => HelixError::InternalProviderError(message),
        _ => HelixError::InternalProviderError(message),
    }
}

fn vertex_parse_response(response: http::Response<Vec<u8>>, latency_ms: u64) -> Result<CompletionResponse, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }
    let parsed: WireResponse =
        serde_json::from_slice(response.body()).map_err(|e| HelixError::MalformedResponse(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| HelixError::MalformedResponse("no candidates in Vertex response".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &candidate.content.parts {
        if !part.text.is_empty() {
            text.push_str(&part.text);
        }
        if let Some(call) = &part.function_call {
            tool_calls.push(ToolCall {
                id: format!("call_{}", call.name),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.args).unwrap_or_default(),
                },
            });
        }
    }

    let finish_reason = parse_finish_reason(candidate.finish_reason.as_deref(), !tool_calls.is_empty());
    let mut message = ChatMessage::assistant(text);
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }

    let usage = parsed
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: "vertex".to_string(),
        created_at: chrono::Utc::now(),
        model_id: String::new(),
        provider_id: "vertex".to_string(),
        choices: vec![Choice {
            index: 0,
            finish_reason,
            message,
        }],
        usage,
        latency_ms,
        quality_score: None,
    })
}

fn parse_vertex_sse_frame(raw: &[u8], stream_id: &str) -> Result<Vec<StreamChunk>, HelixError> {
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();

    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        let parsed: WireResponse =
            serde_json::from_str(data).map_err(|e| HelixError::MalformedResponse(format!("bad vertex SSE frame: {e}")))?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            continue;
        };

        let mut content_text = String::new();
        let mut tool_calls = Vec::new();
        for part in &candidate.content.parts {
            if !part.text.is_empty() {
                content_text.push_str(&part.text);
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", call.name),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: serde_json::to_string(&call.args).unwrap_or_default(),
                    },
                });
            }
        }

        let is_terminal = candidate.finish_reason.is_some();
        out.push(StreamChunk {
            id: stream_id.to_string(),
            index: 0,
            delta: Delta {
                role: None,
                content: if content_text.is_empty() { None } else { Some(content_text) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls.clone()) },
            },
            finish_reason: if is_terminal {
                Some(parse_finish_reason(candidate.finish_reason.as_deref(), !tool_calls.is_empty()))
            } else {
                None
            },
            error: None,
        });
    }

    Ok(out)
}

#[async_trait]
impl ProviderAdapter for VertexAdapter {
    fn provider_id(&self) -> &str {
        "vertex"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = vertex_request(self, request, "generateContent").await?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let mut parsed = vertex_parse_response(response, latency_ms)?;
        parsed.model_id = self.config.model.clone();
        Ok(parsed)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
        let wire_request = vertex_request(self, request, "streamGenerateContent").await?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = helix_http::frame_sse(raw);

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;
            let mut frames = framed;
            loop {
                match frames.next().await {
                    Some(Ok(raw)) => match parse_vertex_sse_frame(&raw, "vertex-stream") {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield chunk;
                            }
                        }
                        Err(e) => {
                            yield StreamChunk::terminal_error("vertex-stream", 0, ApiError::from(&e));
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield StreamChunk::terminal_error("vertex-stream", 0, ApiError::from(&e));
                        return;
                    }
                    None => return,
                }
            }
        }))
    }

    async fn health_probe(&self) -> Result<(), HelixError> {
        let token = tokio::time::timeout(helix_core::HEALTH_PROBE_TIMEOUT, self.bearer_token())
            .await
            .map_err(|_| HelixError::Timeout)??;
        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(format!(
                "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}",
                loc = self.config.location,
                proj = self.config.project_id,
                model = self.config.model,
            ))
            .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Vec::new())
            .map_err(HelixError::from)?;
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
            provider_id: "vertex".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: 1_048_576,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            supports_json_mode: true,
            supports_system_role: true,
            modalities: vec![Modality::Text, Modality::Image, Modality::Pdf],
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.project_id.trim().is_empty() {
            return Err(HelixError::ConfigError("vertex: project_id must not be empty".into()));
        }
        if self.config.location.trim().is_empty() {
            return Err(HelixError::ConfigError("vertex: location must not be empty".into()));
        }
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("vertex: model must not be empty".into()));
        }
        if self.refresh_token.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("vertex: refresh_token must not be empty".into()));
        }
        Ok(())
    }

    /// Vertex AI has no list-models endpoint scoped the way this trait
    /// expects (publisher models are a shared catalog, not a per-project
    /// listing); a host wires discovered models here through manual
    /// `VerifierConfig` entries instead (§4.5.1).
    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
        Ok(vec![self.config.model.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::SamplingParams;

    fn config() -> VertexConfig {
        VertexConfig {
            project_id: "test-project".to_string(),
            location: "us-central1".to_string(),
            model: "gemini-1.5-pro".to_string(),
            oauth_client_id: "client-id".to_string(),
            max_tokens: None,
            temperature: None,
            system: None,
            timeout_seconds: None,
            top_p: None,
            top_k: None,
        }
    }

    fn adapter() -> VertexAdapter {
        VertexAdapter::new(
            config(),
            Credential::new("test-refresh-token"),
            Credential::new("test-client-secret"),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn endpoint_embeds_project_location_and_model() {
        let url = config().endpoint("generateContent");
        assert!(url.contains("test-project"));
        assert!(url.contains("us-central1"));
        assert!(url.contains("gemini-1.5-pro"));
        assert!(url.contains(":generateContent"));
    }

    #[test]
    fn body_carries_no_api_key_or_bearer_header() {
        let adapter = adapter();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let body = vertex_body(&adapter, &request).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn caches_token_until_it_nears_expiry() {
        let adapter = adapter();
        *adapter.cached_token.lock().await = Some(CachedToken {
            access_token: "cached-token".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(10),
        });
        let token = adapter.bearer_token().await.unwrap();
        assert_eq!(token, "cached-token");
    }

    #[test]
    fn parses_function_call_response_into_tool_calls() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        });
        let response = http::Response::builder().status(200).body(serde_json::to_vec(&body).unwrap()).unwrap();
        let parsed = vertex_parse_response(response, 30).unwrap();
        assert_eq!(parsed.choices[0].finish_reason, FinishReason::ToolCalls);
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
    }

    #[test]
    fn validate_config_rejects_empty_refresh_token() {
        let adapter = VertexAdapter::new(config(), Credential::new(""), Credential::new("secret"), reqwest::Client::new());
        assert!(adapter.validate_config().is_err());
    }
}
