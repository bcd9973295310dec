//! Claude provider adapter (§4.1), speaking Anthropic's native Messages
//! API — a bespoke wire format unlike the nine OpenAI-compatible
//! vendors, so this crate does not depend on `helix-openai-wire`.
//! Grounded on `querymt`'s `Anthropic` provider (`HTTPChatProvider`
//! impl): the system-prompt-as-top-level-field convention, `tool_use`/
//! `tool_result` content blocks, and the `content_block_delta` SSE
//! event shape are carried over; the richer `MessageType` (image/PDF)
//! variants are dropped since `helix_core::ChatMessage` is text-only
//! (§3 data model).

use async_trait::async_trait;
use futures::stream::BoxStream;
use helix_core::{
    ApiError, Capabilities, ChatMessage, ChatRole, Choice, CompletionRequest, CompletionResponse,
    Credential, Delta, ErrorKind, FinishReason, FunctionCall, HelixError, Modality, ModelId,
    ProviderAdapter, RetryPolicy, StreamChunk, Tool, ToolCall, Usage,
};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Mirrors `helix_openai_wire::url_schema`: this crate has no dependency
/// on that wire crate, so `Url` config fields need their own JSON Schema
/// stand-in here.
fn url_schema(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(SingleOrVec::Single(Box::new(InstanceType::String))),
        format: Some("uri".to_string()),
        ..Default::default()
    })
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ClaudeConfig {
    #[schemars(schema_with = "url_schema")]
    #[serde(default = "ClaudeConfig::default_base_url")]
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub thinking_budget_tokens: Option<u32>,
}

impl ClaudeConfig {
    pub fn default_base_url() -> Url {
        Url::parse("https://api.anthropic.com/v1/").expect("static URL is valid")
    }
}

pub struct ClaudeAdapter {
    config: ClaudeConfig,
    credential: Credential,
    client: reqwest::Client,
}

impl ClaudeAdapter {
    pub fn new(config: ClaudeConfig, credential: Credential, client: reqwest::Client) -> Self {
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
struct WireContentBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "id")]
    tool_use_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "name")]
    tool_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "input")]
    tool_input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "tool_use_id")]
    tool_result_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "content")]
    tool_output: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Vec<WireContentBlock<'a>>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct WireThinking {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: u32,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<WireThinking>,
}

fn text_block(text: &str) -> WireContentBlock<'_> {
    WireContentBlock {
        block_type: "text",
        text: Some(text),
        tool_use_id: None,
        tool_name: None,
        tool_input: None,
        tool_result_id: None,
        tool_output: None,
    }
}

/// Builds the Anthropic Messages API request. Pure and unit-testable;
/// the only impure step is `helix_http::execute` at the call site.
fn claude_request(
    cfg: &ClaudeAdapter,
    request: &CompletionRequest,
) -> Result<http::Request<Vec<u8>>, HelixError> {
    let mut system = cfg.config.system.clone();
    let mut wire_messages = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role {
            ChatRole::System => {
                system = Some(match system {
                    Some(existing) => format!("{existing}\n{}", message.content),
                    None => message.content.clone(),
                });
            }
            ChatRole::User => {
                wire_messages.push(WireMessage {
                    role: "user",
                    content: vec![text_block(&message.content)],
                });
            }
            ChatRole::Assistant => {
                let mut content = Vec::new();
                if !message.content.is_empty() {
                    content.push(text_block(&message.content));
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        content.push(WireContentBlock {
                            block_type: "tool_use",
                            text: None,
                            tool_use_id: Some(call.id.as_str()),
                            tool_name: Some(call.function.name.as_str()),
                            tool_input: Some(
                                serde_json::from_str(&call.function.arguments)
                                    .unwrap_or(serde_json::Value::Null),
                            ),
                            tool_result_id: None,
                            tool_output: None,
                        });
                    }
                }
                wire_messages.push(WireMessage {
                    role: "assistant",
                    content,
                });
            }
            ChatRole::Tool => {
                wire_messages.push(WireMessage {
                    role: "user",
                    content: vec![WireContentBlock {
                        block_type: "tool_result",
                        text: None,
                        tool_use_id: None,
                        tool_name: None,
                        tool_input: None,
                        tool_result_id: message.tool_call_id.as_deref(),
                        tool_output: Some(message.content.as_str()),
                    }],
                });
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools: &Vec<Tool>| {
        tools
            .iter()
            .map(|t| WireTool {
                name: &t.function.name,
                description: &t.function.description,
                input_schema: &t.function.parameters,
            })
            .collect()
    });

    let body = WireRequest {
        model: &cfg.config.model,
        messages: wire_messages,
        max_tokens: request.sampling.max_tokens.unwrap_or(cfg.config.max_tokens),
        system: system.as_deref(),
        temperature: request.sampling.temperature.or(cfg.config.temperature),
        top_p: request.sampling.top_p.or(cfg.config.top_p),
        top_k: cfg.config.top_k,
        stream: request.stream,
        tools,
        thinking: cfg.config.thinking_budget_tokens.map(|budget_tokens| WireThinking {
            thinking_type: "enabled",
            budget_tokens,
        }),
    };

    let json_body = serde_json::to_vec(&body)?;
    let url = cfg.config.base_url.join("messages").map_err(HelixError::from)?;

    http::Request::builder()
        .method(http::Method::POST)
        .uri(url.to_string())
        .header("x-api-key", cfg.credential.expose())
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(json_body)
        .map_err(HelixError::from)
}

#[derive(Deserialize)]
struct WireResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
    id: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    id: Option<String>,
    model: Option<String>,
    content: Vec<WireResponseContent>,
    stop_reason: Option<String>,
    usage: Option<WireResponseUsage>,
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

fn error_kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthFailed,
        429 => ErrorKind::RateLimited,
        400 => ErrorKind::BadRequest,
        529 => ErrorKind::Overloaded,
        500..=599 => ErrorKind::InternalProviderError,
        _ => ErrorKind::InternalProviderError,
    }
}

fn wire_http_error(response: &http::Response<Vec<u8>>) -> HelixError {
    let status = response.status().as_u16();
    let message = serde_json::from_slice::<serde_json::Value>(response.body())
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str().map(str::to_string)))
        .unwrap_or_else(|| format!("HTTP {status}"));
    match error_kind_for_status(status) {
        ErrorKind::AuthFailed => HelixError::AuthFailed(message),
        ErrorKind::RateLimited => {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            HelixError::RateLimited { retry_after_ms }
        }
        ErrorKind::BadRequest => HelixError::BadRequest(message),
        ErrorKind::Overloaded => HelixError::Overloaded(message),
        _ => HelixError::InternalProviderError(message),
    }
}

fn claude_parse_response(response: http::Response<Vec<u8>>, latency_ms: u64) -> Result<CompletionResponse, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }
    let parsed: WireResponse = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &parsed.content {
        match block.content_type.as_str() {
            "text" => {
                if let Some(t) = &block.text {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(t);
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    id: block.id.clone().unwrap_or_default(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: block.name.clone().unwrap_or_default(),
                        arguments: serde_json::to_string(&block.input.clone().unwrap_or(serde_json::Value::Null))
                            .unwrap_or_default(),
                    },
                });
            }
            _ => {}
        }
    }

    let mut message = ChatMessage::assistant(text);
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }

    let usage = parsed
        .usage
        .map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: parsed.id.unwrap_or_else(|| "unknown".to_string()),
        created_at: chrono::Utc::now(),
        model_id: parsed.model.unwrap_or_default(),
        provider_id: "claude".to_string(),
        choices: vec![Choice {
            index: 0,
            finish_reason: parse_finish_reason(parsed.stop_reason.as_deref()),
            message,
        }],
        usage,
        latency_ms,
        quality_score: None,
    })
}

#[derive(Default)]
struct ToolUseAssembly {
    id: String,
    name: String,
    partial_json: String,
}

#[derive(Deserialize)]
struct WireSseEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: Option<usize>,
    content_block: Option<WireSseContentBlock>,
    delta: Option<WireSseDelta>,
}

#[derive(Deserialize)]
struct WireSseContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct WireSseDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

/// Folds one SSE frame (one `event:`/`data:` pair, or bare `data:` line)
/// into zero or more `StreamChunk`s, accumulating `tool_use` input JSON
/// across `content_block_delta` events the way the non-streaming parser
/// accumulates `WireResponseContent::input` in one shot.
fn parse_claude_sse_frame(
    raw: &[u8],
    stream_id: &str,
    tool_states: &mut HashMap<usize, ToolUseAssembly>,
) -> Result<Vec<StreamChunk>, HelixError> {
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
        let event: WireSseEvent = serde_json::from_str(data)
            .map_err(|e| HelixError::MalformedResponse(format!("bad claude SSE frame: {e}")))?;

        match event.event_type.as_str() {
            "content_block_start" => {
                if let (Some(index), Some(block)) = (event.index, event.content_block) {
                    if block.block_type == "tool_use" {
                        tool_states.insert(
                            index,
                            ToolUseAssembly {
                                id: block.id.unwrap_or_default(),
                                name: block.name.unwrap_or_default(),
                                partial_json: String::new(),
                            },
                        );
                    }
                }
            }
            "content_block_delta" => {
                let index = event.index.unwrap_or(0);
                if let Some(delta) = event.delta {
                    match delta.delta_type.as_deref() {
                        Some("text_delta") => {
                            out.push(StreamChunk {
                                id: stream_id.to_string(),
                                index: index as u32,
                                delta: Delta {
                                    role: None,
                                    content: delta.text,
                                    tool_calls: None,
                                },
                                finish_reason: None,
                                error: None,
                            });
                        }
                        Some("input_json_delta") => {
                            if let Some(state) = tool_states.get_mut(&index) {
                                if let Some(fragment) = delta.partial_json {
                                    state.partial_json.push_str(&fragment);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            "message_delta" => {
                if let Some(delta) = event.delta {
                    if let Some(stop_reason) = delta.stop_reason {
                        let finish_reason = parse_finish_reason(Some(&stop_reason));
                        let tool_calls = if finish_reason == FinishReason::ToolCalls && !tool_states.is_empty() {
                            Some(
                                tool_states
                                    .values()
                                    .map(|s| ToolCall {
                                        id: s.id.clone(),
                                        call_type: "function".to_string(),
                                        function: FunctionCall {
                                            name: s.name.clone(),
                                            arguments: s.partial_json.clone(),
                                        },
                                    })
                                    .collect(),
                            )
                        } else {
                            None
                        };
                        out.push(StreamChunk {
                            id: stream_id.to_string(),
                            index: 0,
                            delta: Delta {
                                role: None,
                                content: None,
                                tool_calls,
                            },
                            finish_reason: Some(finish_reason),
                            error: None,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    Ok(out)
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn provider_id(&self) -> &str {
        "claude"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = claude_request(self, request)?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        claude_parse_response(response, latency_ms)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
        let wire_request = claude_request(self, request)?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = helix_http::frame_sse(raw);

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;
            let mut frames = framed;
            let mut tool_states: HashMap<usize, ToolUseAssembly> = HashMap::new();
            loop {
                match frames.next().await {
                    Some(Ok(raw)) => match parse_claude_sse_frame(&raw, "claude-stream", &mut tool_states) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield chunk;
                            }
                        }
                        Err(e) => {
                            yield StreamChunk::terminal_error("claude-stream", 0, ApiError::from(&e));
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield StreamChunk::terminal_error("claude-stream", 0, ApiError::from(&e));
                        return;
                    }
                    None => return,
                }
            }
        }))
    }

    async fn health_probe(&self) -> Result<(), HelixError> {
        let probe = CompletionRequest {
            messages: vec![ChatMessage::user("ping")],
            tools: None,
            tool_choice: None,
            sampling: helix_core::SamplingParams {
                max_tokens: Some(1),
                ..Default::default()
            },
            stream: false,
        };
        tokio::time::timeout(helix_core::HEALTH_PROBE_TIMEOUT, self.complete(&probe))
            .await
            .map_err(|_| HelixError::Timeout)??;
        Ok(())
    }

    fn capabilities(&self, model_id: &str) -> Capabilities {
        Capabilities {
            provider_id: "claude".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: 200_000,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: model_id.contains("opus") || model_id.contains("sonnet") || model_id.contains("haiku"),
            supports_json_mode: false,
            supports_system_role: true,
            modalities: vec![Modality::Text, Modality::Image, Modality::Pdf],
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("claude: model must not be empty".into()));
        }
        if self.credential.expose().trim().is_empty() {
            return Err(HelixError::ConfigError("claude: api_key must not be empty".into()));
        }
        Ok(())
    }

    async fn discover_models(&self) -> Result<Vec<ModelId>, HelixError> {
        let url = self.config.base_url.join("models").map_err(HelixError::from)?;
        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri(url.to_string())
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .body(Vec::new())
            .map_err(HelixError::from)?;
        let response = helix_http::execute(&self.client, request, self.deadline()).await?;
        if !response.status().is_success() {
            return Err(wire_http_error(&response));
        }
        let parsed: serde_json::Value = serde_json::from_slice(response.body())
            .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
        let entries = parsed
            .get("data")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| HelixError::MalformedResponse("`data` missing or not an array".into()))?;
        Ok(entries
            .iter()
            .filter_map(|m| m.get("id"))
            .filter_map(serde_json::Value::as_str)
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::SamplingParams;

    fn adapter() -> ClaudeAdapter {
        ClaudeAdapter::new(
            ClaudeConfig {
                base_url: ClaudeConfig::default_base_url(),
                model: "claude-3-5-sonnet-20241022".to_string(),
                max_tokens: 1024,
                temperature: None,
                system: None,
                timeout_seconds: None,
                top_p: None,
                top_k: None,
                thinking_budget_tokens: None,
            },
            Credential::new("sk-ant-test"),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn pulls_system_role_message_into_top_level_field() {
        let adapter = adapter();
        let request = CompletionRequest {
            messages: vec![ChatMessage::system("be terse"), ChatMessage::user("2+2?")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = claude_request(&adapter, &request).unwrap();
        let body: serde_json::Value = serde_json::from_slice(wire.body()).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn uses_x_api_key_header_not_bearer() {
        let adapter = adapter();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = claude_request(&adapter, &request).unwrap();
        assert_eq!(wire.headers().get("x-api-key").unwrap(), "sk-ant-test");
        assert!(wire.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn parses_tool_use_response_into_tool_calls() {
        let body = serde_json::json!({
            "id": "msg_1",
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "tool_use",
            "content": [{"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "Paris"}}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let response = http::Response::builder().status(200).body(serde_json::to_vec(&body).unwrap()).unwrap();
        let parsed = claude_parse_response(response, 50).unwrap();
        assert_eq!(parsed.choices[0].finish_reason, FinishReason::ToolCalls);
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
    }

    #[test]
    fn sse_text_delta_becomes_content_chunk() {
        let mut states = HashMap::new();
        let frame = b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n";
        let chunks = parse_claude_sse_frame(frame, "s1", &mut states).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn maps_529_to_overloaded() {
        let response = http::Response::builder().status(529).body(b"{}".to_vec()).unwrap();
        assert!(matches!(wire_http_error(&response), HelixError::Overloaded(_)));
    }
}
