//! Gemini provider adapter (§4.1), speaking Google's Generative Language
//! API — a bespoke wire format (query-string API key, `contents`/`parts`
//! message shape, `functionCall`/`functionResponse` tool blocks) grounded
//! on the teacher's `Google` provider (`crates/google/src/lib.rs`). Like
//! Claude this needs no `helix_openai_wire` dependency.

use async_trait::async_trait;
use futures::stream::BoxStream;
use helix_core::{
    ApiError, Capabilities, ChatMessage, ChatRole, Choice, CompletionRequest, CompletionResponse,
    Credential, Delta, FinishReason, FunctionCall, HelixError, Modality, ModelId, ProviderAdapter,
    RetryPolicy, StreamChunk, Tool, ToolCall, Usage,
};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

fn url_schema(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(SingleOrVec::Single(Box::new(InstanceType::String))),
        format: Some("uri".to_string()),
        ..Default::default()
    })
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GeminiConfig {
    /// The `models` collection endpoint, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta/models/` — both
    /// the listing request and per-model `:generateContent` calls are
    /// joined against this one URL, following the teacher's
    /// `Google::default_base_url`.
    #[schemars(schema_with = "url_schema")]
    #[serde(default = "GeminiConfig::default_base_url")]
    pub base_url: Url,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl GeminiConfig {
    pub fn default_base_url() -> Url {
        Url::parse("https://generativelanguage.googleapis.com/v1beta/models/")
            .expect("static URL is valid")
    }
}

pub struct GeminiAdapter {
    config: GeminiConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig, credential: Credential, client: reqwest::Client) -> Self {
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

/// Builds a request against `{base_url}{model}:{operation}?key={api_key}`.
/// `operation` is `generateContent` for `complete` and
/// `streamGenerateContent` (with `alt=sse`) for `stream`.
fn gemini_request(
    adapter: &GeminiAdapter,
    request: &CompletionRequest,
    operation: &str,
) -> Result<http::Request<Vec<u8>>, HelixError> {
    let mut contents = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &adapter.config.system {
        contents.push(WireContent {
            role: "user",
            parts: vec![WirePart::Text(system)],
        });
    }

    for message in &request.messages {
        match message.role {
            ChatRole::System => {
                contents.push(WireContent {
                    role: "user",
                    parts: vec![WirePart::Text(&message.content)],
                });
            }
            ChatRole::User => {
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
                            args: serde_json::from_str(&call.function.arguments)
                                .unwrap_or(Value::Null),
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

    let json_body = serde_json::to_vec(&body)?;

    let path = format!("{}:{}", adapter.config.model, operation);
    let mut url = adapter.config.base_url.join(&path).map_err(HelixError::from)?;
    let query = if operation == "streamGenerateContent" {
        format!("alt=sse&key={}", adapter.credential.expose())
    } else {
        format!("key={}", adapter.credential.expose())
    };
    url.set_query(Some(&query));

    http::Request::builder()
        .method(http::Method::POST)
        .uri(url.to_string())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(json_body)
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

fn gemini_parse_response(
    response: http::Response<Vec<u8>>,
    latency_ms: u64,
) -> Result<CompletionResponse, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }
    let parsed: WireResponse = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| HelixError::MalformedResponse("no candidates in Gemini response".into()))?;

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
        id: "gemini".to_string(),
        created_at: chrono::Utc::now(),
        model_id: String::new(),
        provider_id: "gemini".to_string(),
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

/// Each Gemini SSE frame carries one complete (non-delta) candidate
/// object; unlike OpenAI-wire streams there is no separate `delta` shape
/// to parse, so each frame maps to exactly one `StreamChunk`.
fn parse_gemini_sse_frame(raw: &[u8], stream_id: &str) -> Result<Vec<StreamChunk>, HelixError> {
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
        let parsed: WireResponse = serde_json::from_str(data)
            .map_err(|e| HelixError::MalformedResponse(format!("bad gemini SSE frame: {e}")))?;

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
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = gemini_request(self, request, "generateContent")?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let mut parsed = gemini_parse_response(response, latency_ms)?;
        parsed.model_id = self.config.model.clone();
        Ok(parsed)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
        let wire_request = gemini_request(self, request, "streamGenerateContent")?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = helix_http::frame_sse(raw);

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;
            let mut frames = framed;
            loop {
                match frames.next().await {
                    Some(Ok(raw)) => match parse_gemini_sse_frame(&raw, "gemini-stream") {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield chunk;
                            }
                        }
                        Err(e) => {
                            yield StreamChunk::terminal_error("gemini-stream", 0, ApiError::from(&e));
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield StreamChunk::terminal_error("gemini-stream", 0, ApiError::from(&e));
                        return;
                    }
                    None => return,
                }
            }
        }))
    }

    async fn health_probe(&self) -> Result<(), HelixError> {
        let request = list_models_request(self)?;
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
            provider_id: "gemini".to_string(),
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
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("gemini: model must not be empty".into()));
        }
        if self.credential.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("gemini: api_key must not be empty".into()));
        }
        Ok(())
    }

    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
        let request = list_models_request(self)?;
        let response = helix_http::execute(&self.client, request, self.deadline()).await?;
        if !response.status().is_success() {
            return Err(wire_http_error(&response));
        }
        let parsed: Value = serde_json::from_slice(response.body())
            .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
        let entries = parsed
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| HelixError::MalformedResponse("`models` missing or not an array".into()))?;
        Ok(entries
            .iter()
            .filter_map(|m| m.get("name"))
            .filter_map(Value::as_str)
            .filter_map(|v| v.strip_prefix("models/"))
            .map(String::from)
            .collect())
    }
}

fn list_models_request(adapter: &GeminiAdapter) -> Result<http::Request<Vec<u8>>, HelixError> {
    let mut url = adapter.config.base_url.clone();
    url.set_query(Some(&format!("key={}", adapter.credential.expose())));
    http::Request::builder()
        .method(http::Method::GET)
        .uri(url.to_string())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Vec::new())
        .map_err(HelixError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::SamplingParams;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(
            GeminiConfig {
                base_url: GeminiConfig::default_base_url(),
                model: "gemini-1.5-flash".to_string(),
                max_tokens: None,
                temperature: None,
                system: None,
                timeout_seconds: None,
                top_p: None,
                top_k: None,
            },
            Credential::new("test-key"),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn request_carries_api_key_as_query_param_not_header() {
        let adapter = adapter();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = gemini_request(&adapter, &request, "generateContent").unwrap();
        assert!(wire.uri().to_string().contains("key=test-key"));
        assert!(wire.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn tool_result_message_becomes_function_role_content() {
        let adapter = adapter();
        let mut message = ChatMessage::user("{}");
        message.role = ChatRole::Tool;
        message.name = Some("get_weather".to_string());
        let request = CompletionRequest {
            messages: vec![message],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = gemini_request(&adapter, &request, "generateContent").unwrap();
        let body: Value = serde_json::from_slice(wire.body()).unwrap();
        assert_eq!(body["contents"][0]["role"], "function");
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
        let parsed = gemini_parse_response(response, 30).unwrap();
        assert_eq!(parsed.choices[0].finish_reason, FinishReason::ToolCalls);
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
    }

    #[test]
    fn maps_safety_finish_reason_to_content_filter() {
        assert_eq!(parse_finish_reason(Some("SAFETY"), false), FinishReason::ContentFilter);
    }
}
