//! Wire-format translation shared by every vendor whose HTTP surface is
//! an OpenAI-compatible `chat/completions` API: DeepSeek, Qwen, Zai,
//! OpenRouter, Mistral, Cerebras, Groq, Together, and Azure OpenAI. Each
//! vendor crate implements `OpenAIProviderConfig` for its own config
//! struct and delegates request building / response parsing here, the
//! way the teacher's `groq`/`mistral`/`alibaba` crates delegate to
//! `qmt_openai::api`.

use chrono::Utc;
use helix_core::{
    ApiError, ChatMessage, ChatRole, Choice, CompletionRequest, CompletionResponse, Delta,
    ErrorKind, FinishReason, FunctionCall, HelixError, StreamChunk, StructuredOutputFormat, Tool,
    ToolCall, ToolChoice, Usage,
};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Response,
};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Per-adapter accessors the wire-translation functions below read from.
/// One adapter config struct per vendor implements this; fields not
/// applicable to a vendor simply return `None`.
pub trait OpenAIProviderConfig {
    fn api_key(&self) -> &str;
    fn base_url(&self) -> &Url;
    fn model(&self) -> &str;
    fn max_tokens(&self) -> Option<&u32>;
    fn temperature(&self) -> Option<&f32>;
    fn system(&self) -> Option<&str>;
    fn timeout_seconds(&self) -> Option<&u64>;
    fn stream(&self) -> Option<&bool>;
    fn top_p(&self) -> Option<&f32>;
    fn top_k(&self) -> Option<&u32>;
    fn tools(&self) -> Option<&[Tool]>;
    fn tool_choice(&self) -> Option<&ToolChoice>;
    fn embedding_encoding_format(&self) -> Option<&str>;
    fn embedding_dimensions(&self) -> Option<&u32>;
    fn reasoning_effort(&self) -> Option<&String> {
        None
    }
    fn json_schema(&self) -> Option<&StructuredOutputFormat>;
}

/// A `schemars` schema helper for `Url` fields, so adapter config structs
/// expose a plain string-with-`uri`-format in their JSON Schema rather
/// than `url::Url`'s own (more complex) derived shape.
pub fn url_schema(_gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(SingleOrVec::Single(Box::new(InstanceType::String))),
        format: Some("uri".to_string()),
        ..Default::default()
    })
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCall]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

#[derive(Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    response_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<StructuredOutputFormat>,
}

#[derive(Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

fn auth_header_value(api_key: &str) -> String {
    format!("Bearer {api_key}")
}

/// Builds a `POST {base_url}/chat/completions` request from a normalized
/// `CompletionRequest`, per the vendor's `OpenAIProviderConfig`.
pub fn openai_chat_request<C: OpenAIProviderConfig>(
    cfg: &C,
    request: &CompletionRequest,
) -> Result<Request<Vec<u8>>, HelixError> {
    let mut messages: Vec<WireMessage<'_>> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = cfg.system() {
        messages.push(WireMessage {
            role: "system",
            content: Some(system),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    for message in &request.messages {
        messages.push(WireMessage {
            role: role_str(message.role),
            content: Some(message.content.as_str()),
            tool_calls: message.tool_calls.as_deref(),
            tool_call_id: message.tool_call_id.as_deref(),
        });
    }

    let tools = request.tools.as_deref().or_else(|| cfg.tools());
    let tool_choice = request.tool_choice.as_ref().or_else(|| cfg.tool_choice());

    let body = WireChatRequest {
        model: cfg.model(),
        messages,
        max_tokens: request.sampling.max_tokens.or_else(|| cfg.max_tokens().copied()),
        temperature: request.sampling.temperature.or_else(|| cfg.temperature().copied()),
        stream: request.stream,
        top_p: request.sampling.top_p.or_else(|| cfg.top_p().copied()),
        top_k: cfg.top_k().copied(),
        stop: &request.sampling.stop,
        presence_penalty: request.sampling.presence_penalty,
        frequency_penalty: request.sampling.frequency_penalty,
        seed: request.sampling.seed,
        tools,
        tool_choice,
        reasoning_effort: cfg.reasoning_effort().map(String::as_str),
        response_format: cfg.json_schema().cloned().map(|schema| WireResponseFormat {
            response_type: "json_schema",
            json_schema: Some(schema),
        }),
    };

    let json_body = serde_json::to_vec(&body)?;
    let url = cfg
        .base_url()
        .join("chat/completions")
        .map_err(HelixError::from)?;

    Request::builder()
        .method(Method::POST)
        .uri(url.to_string())
        .header(AUTHORIZATION, auth_header_value(cfg.api_key()))
        .header(CONTENT_TYPE, "application/json")
        .body(json_body)
        .map_err(HelixError::from)
}

#[derive(Deserialize)]
struct WireRawUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireRawUsage> for Usage {
    fn from(raw: WireRawUsage) -> Self {
        Usage {
            prompt_tokens: raw.prompt_tokens,
            completion_tokens: raw.completion_tokens,
            total_tokens: if raw.total_tokens > 0 {
                raw.total_tokens
            } else {
                raw.prompt_tokens + raw.completion_tokens
            },
        }
    }
}

#[derive(Deserialize)]
struct WireChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct WireChatChoice {
    index: u32,
    finish_reason: Option<String>,
    message: WireChatMessage,
}

#[derive(Deserialize)]
struct WireChatResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<WireChatChoice>,
    usage: Option<WireRawUsage>,
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

fn error_kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthFailed,
        429 => ErrorKind::RateLimited,
        400 => ErrorKind::BadRequest,
        404 => ErrorKind::BadRequest,
        500..=599 => ErrorKind::InternalProviderError,
        _ => ErrorKind::InternalProviderError,
    }
}

/// Extracts a clean error message from a non-2xx JSON body, falling back
/// to the raw body text when the vendor doesn't use the common
/// `{"error": {"message": ...}}` envelope.
fn extract_error_message(body: &[u8], status: u16) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {status}: {}", String::from_utf8_lossy(body)))
}

/// Converts a non-2xx HTTP response into a `HelixError`, honoring
/// `Retry-After` for 429s the way the spec's retry policy requires (the
/// adapter must not retry `RateLimited` itself; it only needs to carry
/// the header value up).
pub fn wire_http_error(response: &Response<Vec<u8>>) -> HelixError {
    let status = response.status().as_u16();
    let message = extract_error_message(response.body(), status);
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
        _ => HelixError::InternalProviderError(message),
    }
}

/// Parses a chat/completions response into the uniform
/// `CompletionResponse`. `provider_id` is stamped in by the caller since
/// the wire format itself carries no vendor identity.
pub fn openai_parse_chat(
    provider_id: &str,
    response: Response<Vec<u8>>,
    latency_ms: u64,
) -> Result<CompletionResponse, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }

    let parsed: WireChatResponse = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;

    let choices = parsed
        .choices
        .into_iter()
        .map(|choice| {
            let finish_reason = parse_finish_reason(choice.finish_reason.as_deref());
            let mut message = ChatMessage::assistant(choice.message.content.unwrap_or_default());
            message.tool_calls = choice.message.tool_calls;
            Choice {
                index: choice.index,
                message,
                finish_reason,
            }
        })
        .collect();

    Ok(CompletionResponse {
        id: parsed.id.unwrap_or_else(|| "unknown".to_string()),
        created_at: Utc::now(),
        model_id: parsed.model.unwrap_or_default(),
        provider_id: provider_id.to_string(),
        choices,
        usage: parsed.usage.map(Usage::from).unwrap_or_default(),
        latency_ms,
        quality_score: None,
    })
}

#[derive(Serialize)]
struct WireEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

pub fn openai_embed_request<C: OpenAIProviderConfig>(
    cfg: &C,
    inputs: &[String],
) -> Result<Request<Vec<u8>>, HelixError> {
    let body = WireEmbeddingRequest {
        model: cfg.model(),
        input: inputs,
        encoding_format: cfg.embedding_encoding_format(),
        dimensions: cfg.embedding_dimensions().copied(),
    };
    let json_body = serde_json::to_vec(&body)?;
    let url = cfg.base_url().join("embeddings").map_err(HelixError::from)?;

    Request::builder()
        .method(Method::POST)
        .uri(url.to_string())
        .header(AUTHORIZATION, auth_header_value(cfg.api_key()))
        .header(CONTENT_TYPE, "application/json")
        .body(json_body)
        .map_err(HelixError::from)
}

#[derive(Deserialize)]
struct WireEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct WireEmbeddingResponse {
    data: Vec<WireEmbeddingData>,
}

pub fn openai_parse_embed(response: Response<Vec<u8>>) -> Result<Vec<Vec<f32>>, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }
    let parsed: WireEmbeddingResponse = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

pub fn openai_list_models_request<C: OpenAIProviderConfig>(
    cfg: &C,
) -> Result<Request<Vec<u8>>, HelixError> {
    let url = cfg.base_url().join("models").map_err(HelixError::from)?;
    Request::builder()
        .method(Method::GET)
        .uri(url.to_string())
        .header(AUTHORIZATION, auth_header_value(cfg.api_key()))
        .header(CONTENT_TYPE, "application/json")
        .body(Vec::new())
        .map_err(HelixError::from)
}

pub fn openai_parse_list_models(response: &Response<Vec<u8>>) -> Result<Vec<String>, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(response));
    }
    let parsed: Value = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;
    let entries = parsed
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| HelixError::MalformedResponse("`data` missing or not an array".into()))?;
    Ok(entries
        .iter()
        .filter_map(|m| m.get("id"))
        .filter_map(Value::as_str)
        .map(String::from)
        .collect())
}

/// Incremental tool-call assembly state, keyed by the tool call's index
/// within a single stream, since vendors split `id`/`name`/`arguments`
/// across multiple chunks.
#[derive(Default)]
pub struct ToolCallAssembly {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Deserialize)]
struct WireStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireStreamToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    function: WireStreamFunction,
}

#[derive(Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    index: u32,
    delta: WireStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireStreamEvent {
    id: Option<String>,
    choices: Vec<WireStreamChoice>,
}

/// Parses one SSE frame's worth of bytes (one or more `data: ...` lines)
/// into zero or more `StreamChunk`s, folding incremental tool-call deltas
/// into `tool_states` (keyed by the vendor's per-call index) until a
/// call's arguments are complete. Returns an empty vector for a bare
/// `data: [DONE]` frame.
pub fn parse_openai_sse_chunk(
    raw: &[u8],
    tool_states: &mut HashMap<usize, ToolCallAssembly>,
) -> Result<Vec<StreamChunk>, HelixError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            continue;
        }
        if data.is_empty() {
            continue;
        }

        let event: WireStreamEvent = serde_json::from_str(data)
            .map_err(|e| HelixError::MalformedResponse(format!("bad SSE frame: {e}")))?;
        let id = event.id.unwrap_or_else(|| "stream".to_string());

        for choice in event.choices {
            if let Some(calls) = choice.delta.tool_calls {
                for call in calls {
                    let index = call.index.unwrap_or(0);
                    let state = tool_states.entry(index).or_default();
                    if let Some(id) = call.id {
                        state.id = id;
                    }
                    if let Some(name) = call.function.name {
                        state.name = name;
                    }
                    state.arguments.push_str(&call.function.arguments);
                }
            }

            let finish_reason = choice.finish_reason.as_deref().map(parse_finish_reason);
            let tool_calls = if finish_reason == Some(FinishReason::ToolCalls) && !tool_states.is_empty()
            {
                Some(
                    tool_states
                        .values()
                        .map(|s| ToolCall {
                            id: s.id.clone(),
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: s.name.clone(),
                                arguments: s.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            } else {
                None
            };

            out.push(StreamChunk {
                id: id.clone(),
                index: choice.index,
                delta: Delta {
                    role: None,
                    content: choice.delta.content,
                    tool_calls,
                },
                finish_reason,
                error: None,
            });
        }
    }

    Ok(out)
}

/// Converts a `HelixError` surfaced mid-stream into the distinguished
/// terminal error chunk the specification requires (§7 "mid-stream
/// errors"): receivers must treat the whole lazy sequence as failed.
pub fn terminal_error_chunk(stream_id: &str, index: u32, err: &HelixError) -> StreamChunk {
    StreamChunk::terminal_error(stream_id, index, ApiError::from(err))
}

/// Folds a raw SSE-frame byte stream (as produced by
/// `helix_http::frame_sse`) into the uniform `StreamChunk` sequence every
/// OpenAI-wire vendor adapter's `stream()` returns. A frame-level error
/// (transport failure, malformed JSON) is converted to the distinguished
/// terminal error chunk and ends the sequence, matching §7's "mid-stream
/// errors" rule. Shared here rather than duplicated across the nine
/// OpenAI-compatible vendor crates, since the folding logic is identical
/// for all of them.
pub fn sse_frames_to_chunks(
    mut frames: futures::stream::BoxStream<'static, Result<Vec<u8>, HelixError>>,
) -> futures::stream::BoxStream<'static, StreamChunk> {
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        let mut tool_states: HashMap<usize, ToolCallAssembly> = HashMap::new();
        loop {
            match frames.next().await {
                Some(Ok(raw)) => match parse_openai_sse_chunk(&raw, &mut tool_states) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield chunk;
                        }
                    }
                    Err(e) => {
                        yield terminal_error_chunk("stream", 0, &e);
                        return;
                    }
                },
                Some(Err(e)) => {
                    yield terminal_error_chunk("stream", 0, &e);
                    return;
                }
                None => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::{ChatMessage, SamplingParams};
    use std::collections::HashMap as Map;

    struct FakeConfig {
        base_url: Url,
        api_key: String,
        model: String,
    }

    impl OpenAIProviderConfig for FakeConfig {
        fn api_key(&self) -> &str {
            &self.api_key
        }
        fn base_url(&self) -> &Url {
            &self.base_url
        }
        fn model(&self) -> &str {
            &self.model
        }
        fn max_tokens(&self) -> Option<&u32> {
            None
        }
        fn temperature(&self) -> Option<&f32> {
            None
        }
        fn system(&self) -> Option<&str> {
            None
        }
        fn timeout_seconds(&self) -> Option<&u64> {
            None
        }
        fn stream(&self) -> Option<&bool> {
            None
        }
        fn top_p(&self) -> Option<&f32> {
            None
        }
        fn top_k(&self) -> Option<&u32> {
            None
        }
        fn tools(&self) -> Option<&[Tool]> {
            None
        }
        fn tool_choice(&self) -> Option<&ToolChoice> {
            None
        }
        fn embedding_encoding_format(&self) -> Option<&str> {
            None
        }
        fn embedding_dimensions(&self) -> Option<&u32> {
            None
        }
        fn json_schema(&self) -> Option<&StructuredOutputFormat> {
            None
        }
    }

    fn fake_config() -> FakeConfig {
        FakeConfig {
            base_url: Url::parse("https://api.example.com/v1/").unwrap(),
            api_key: "sk-test".to_string(),
            model: "example-model".to_string(),
        }
    }

    #[test]
    fn builds_chat_request_with_bearer_auth() {
        let cfg = fake_config();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("2+2?")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let built = openai_chat_request(&cfg, &request).unwrap();
        assert_eq!(built.uri(), "https://api.example.com/v1/chat/completions");
        assert_eq!(
            built.headers().get(AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn carries_stop_penalties_and_seed_verbatim() {
        let cfg = fake_config();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("2+2?")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams {
                stop: vec!["\n".to_string(), "END".to_string()],
                presence_penalty: Some(0.4),
                frequency_penalty: Some(0.2),
                seed: Some(42),
                ..Default::default()
            },
            stream: false,
        };
        let built = openai_chat_request(&cfg, &request).unwrap();
        let body: Value = serde_json::from_slice(built.body()).unwrap();
        assert_eq!(body["stop"], serde_json::json!(["\n", "END"]));
        assert_eq!(body["presence_penalty"], 0.4);
        assert_eq!(body["frequency_penalty"], 0.2);
        assert_eq!(body["seed"], 42);
    }

    #[test]
    fn parses_successful_chat_response() {
        let body = serde_json::json!({
            "id": "cmpl-1",
            "model": "example-model",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "4"}
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        });
        let response = Response::builder()
            .status(200)
            .body(serde_json::to_vec(&body).unwrap())
            .unwrap();
        let parsed = openai_parse_chat("example", response, 42).unwrap();
        assert_eq!(parsed.text(), Some("4"));
        assert_eq!(parsed.usage.total_tokens, 6);
        assert_eq!(parsed.latency_ms, 42);
    }

    #[test]
    fn maps_429_to_rate_limited_with_retry_after() {
        let response = Response::builder()
            .status(429)
            .header("retry-after", "3")
            .body(b"{\"error\":{\"message\":\"slow down\"}}".to_vec())
            .unwrap();
        let err = wire_http_error(&response);
        match err {
            HelixError::RateLimited { retry_after_ms } => {
                assert_eq!(retry_after_ms, Some(3000));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn sse_parsing_accumulates_streamed_content() {
        let mut states: Map<usize, ToolCallAssembly> = Map::new();
        let frame = b"data: {\"id\":\"s1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hel\"}}]}\n\ndata: {\"id\":\"s1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n";
        let chunks = parse_openai_sse_chunk(frame, &mut states).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta.content.as_deref(), Some("hel"));
        assert!(chunks[1].is_terminal());
    }

    #[test]
    fn done_frame_yields_no_chunks() {
        let mut states: Map<usize, ToolCallAssembly> = Map::new();
        let chunks = parse_openai_sse_chunk(b"data: [DONE]\n", &mut states).unwrap();
        assert!(chunks.is_empty());
    }
}
