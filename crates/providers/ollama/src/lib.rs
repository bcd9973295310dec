//! Ollama provider adapter (§4.1), speaking the local/self-hosted
//! Ollama server's `/api/chat` surface — grounded on the teacher's
//! `Ollama` provider. Two genuine quirks carried over: the full
//! `OllamaOptions` sampling-parameter surface (richer than every
//! OpenAI-wire vendor) and newline-delimited JSON streaming instead of
//! SSE, so this crate frames its own stream rather than reusing
//! `helix_http::frame_sse`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use helix_core::{
    ApiError, Capabilities, ChatMessage, ChatRole, Choice, CompletionRequest, CompletionResponse,
    Credential, Delta, FinishReason, FunctionCall, HelixError, Modality, ModelId, ProviderAdapter,
    RetryPolicy, StreamChunk, ToolCall, Usage,
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
pub struct OllamaConfig {
    #[schemars(schema_with = "url_schema")]
    #[serde(default = "OllamaConfig::default_base_url")]
    pub base_url: Url,
    pub model: String,
    pub timeout_seconds: Option<u64>,
    pub reasoning: Option<bool>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub min_p: Option<f32>,
    pub typical_p: Option<f32>,
    pub repeat_last_n: Option<i32>,
    pub repeat_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub seed: Option<u32>,
    pub num_ctx: Option<u32>,
}

impl OllamaConfig {
    pub fn default_base_url() -> Url {
        Url::parse("http://localhost:11434/").expect("static URL is valid")
    }
}

pub struct OllamaAdapter {
    config: OllamaConfig,
    /// Bearer token for hosted Ollama deployments; a local server needs
    /// none, so this is optional unlike every other adapter's `Credential`.
    credential: Option<Credential>,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(config: OllamaConfig, credential: Option<Credential>, client: reqwest::Client) -> Self {
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

#[derive(Serialize, Clone)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    typical_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_last_n: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'a str,
    function: &'a helix_core::FunctionTool,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    think: bool,
    options: WireOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

fn build_options(adapter: &OllamaAdapter, request: &CompletionRequest) -> WireOptions {
    WireOptions {
        num_ctx: adapter.config.num_ctx,
        temperature: request.sampling.temperature.or(adapter.config.temperature),
        top_p: request.sampling.top_p.or(adapter.config.top_p),
        top_k: adapter.config.top_k,
        min_p: adapter.config.min_p,
        typical_p: adapter.config.typical_p,
        repeat_last_n: adapter.config.repeat_last_n,
        repeat_penalty: adapter.config.repeat_penalty,
        presence_penalty: request.sampling.presence_penalty.or(adapter.config.presence_penalty),
        frequency_penalty: request.sampling.frequency_penalty.or(adapter.config.frequency_penalty),
        num_predict: request.sampling.max_tokens.or(adapter.config.max_tokens).map(|t| t as i32),
        stop: request.sampling.stop.clone(),
        seed: request.sampling.seed.map(|s| s as u32).or(adapter.config.seed),
    }
}

fn ollama_request(
    adapter: &OllamaAdapter,
    request: &CompletionRequest,
    stream: bool,
) -> Result<http::Request<Vec<u8>>, HelixError> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &adapter.config.system {
        messages.push(WireMessage {
            role: "system",
            content: system,
            name: None,
        });
    }
    for message in &request.messages {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        messages.push(WireMessage {
            role,
            content: &message.content,
            name: message.name.as_deref(),
        });
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| WireTool {
                tool_type: "function",
                function: &t.function,
            })
            .collect()
    });

    let body = WireRequest {
        model: &adapter.config.model,
        messages,
        stream,
        think: adapter.config.reasoning.unwrap_or(false),
        options: build_options(adapter, request),
        tools,
    };

    let json_body = serde_json::to_vec(&body)?;
    let url = adapter.config.base_url.join("api/chat").map_err(HelixError::from)?;

    let mut builder = http::Request::builder()
        .method(http::Method::POST)
        .uri(url.to_string())
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(credential) = &adapter.credential {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {}", credential.expose()));
    }
    builder.body(json_body).map_err(HelixError::from)
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunctionToolCall,
}

#[derive(Deserialize)]
struct WireFunctionToolCall {
    name: String,
    arguments: Value,
}

#[derive(Deserialize, Default)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireResponse {
    message: Option<WireResponseMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

fn wire_http_error(response: &http::Response<Vec<u8>>) -> HelixError {
    let status = response.status().as_u16();
    let message = String::from_utf8_lossy(response.body()).to_string();
    match status {
        401 | 403 => HelixError::AuthFailed(message),
        429 => HelixError::RateLimited { retry_after_ms: None },
        400 | 404 => HelixError::BadRequest(message),
        500..=599 => HelixError::InternalProviderError(message),
        _ => HelixError::InternalProviderError(message),
    }
}

fn convert_tool_calls(calls: &[WireToolCall]) -> Vec<ToolCall> {
    calls
        .iter()
        .map(|c| ToolCall {
            id: format!("call_{}", c.function.name),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: c.function.name.clone(),
                arguments: serde_json::to_string(&c.function.arguments).unwrap_or_default(),
            },
        })
        .collect()
}

fn parse_finish_reason(raw: Option<&str>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

fn ollama_parse_response(
    response: http::Response<Vec<u8>>,
    latency_ms: u64,
) -> Result<CompletionResponse, HelixError> {
    if !response.status().is_success() {
        return Err(wire_http_error(&response));
    }
    let parsed: WireResponse = serde_json::from_slice(response.body())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))?;

    let wire_message = parsed.message.unwrap_or_default();
    let tool_calls = wire_message.tool_calls.as_deref().map(convert_tool_calls).unwrap_or_default();
    let finish_reason = parse_finish_reason(parsed.done_reason.as_deref(), !tool_calls.is_empty());

    let mut message = ChatMessage::assistant(wire_message.content);
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }

    Ok(CompletionResponse {
        id: "ollama".to_string(),
        created_at: chrono::Utc::now(),
        model_id: String::new(),
        provider_id: "ollama".to_string(),
        choices: vec![Choice {
            index: 0,
            finish_reason,
            message,
        }],
        usage: Usage {
            prompt_tokens: parsed.prompt_eval_count.unwrap_or(0),
            completion_tokens: parsed.eval_count.unwrap_or(0),
            total_tokens: parsed.prompt_eval_count.unwrap_or(0) + parsed.eval_count.unwrap_or(0),
        },
        latency_ms,
        quality_score: None,
    })
}

/// Splits a raw byte stream on `\n` boundaries, buffering partial lines
/// across reads — Ollama's streaming endpoint emits one complete JSON
/// object per line rather than SSE's blank-line-delimited frames.
fn frame_ndjson(
    mut bytes: BoxStream<'static, Result<bytes::Bytes, HelixError>>,
) -> BoxStream<'static, Result<Vec<u8>, HelixError>> {
    use futures::StreamExt;
    Box::pin(async_stream::stream! {
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(data) => {
                    buf.extend_from_slice(&data);
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line = buf[..pos].to_vec();
                        buf = buf[pos + 1..].to_vec();
                        if !line.is_empty() {
                            yield Ok(line);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !buf.is_empty() {
            yield Ok(buf);
        }
    })
}

fn parse_ndjson_frame(raw: &[u8], stream_id: &str) -> Result<StreamChunk, HelixError> {
    let parsed: WireResponse = serde_json::from_slice(raw)
        .map_err(|e| HelixError::MalformedResponse(format!("bad ollama NDJSON frame: {e}")))?;

    let wire_message = parsed.message.unwrap_or_default();
    let tool_calls = wire_message.tool_calls.as_deref().map(convert_tool_calls).unwrap_or_default();

    Ok(StreamChunk {
        id: stream_id.to_string(),
        index: 0,
        delta: Delta {
            role: None,
            content: if wire_message.content.is_empty() { None } else { Some(wire_message.content) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls.clone()) },
        },
        finish_reason: if parsed.done {
            Some(parse_finish_reason(parsed.done_reason.as_deref(), !tool_calls.is_empty()))
        } else {
            None
        },
        error: None,
    })
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, HelixError> {
        let started = std::time::Instant::now();
        let op = || async {
            let wire_request = ollama_request(self, request, false)?;
            helix_http::execute(&self.client, wire_request, self.deadline()).await
        };
        let response = helix_core::with_retry(RetryPolicy::default(), op).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let mut parsed = ollama_parse_response(response, latency_ms)?;
        parsed.model_id = self.config.model.clone();
        Ok(parsed)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
        let wire_request = ollama_request(self, request, true)?;
        let raw = helix_http::execute_stream(&self.client, wire_request).await?;
        let framed = frame_ndjson(raw);

        Ok(Box::pin(async_stream::stream! {
            use futures::StreamExt;
            let mut frames = framed;
            loop {
                match frames.next().await {
                    Some(Ok(raw)) => match parse_ndjson_frame(&raw, "ollama-stream") {
                        Ok(chunk) => yield chunk,
                        Err(e) => {
                            yield StreamChunk::terminal_error("ollama-stream", 0, ApiError::from(&e));
                            return;
                        }
                    },
                    Some(Err(e)) => {
                        yield StreamChunk::terminal_error("ollama-stream", 0, ApiError::from(&e));
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
            provider_id: "ollama".to_string(),
            model_id: model_id.to_string(),
            max_context_tokens: self.config.num_ctx.unwrap_or(8_192),
            supports_streaming: true,
            supports_tools: true,
            supports_vision: model_id.contains("vision") || model_id.contains("llava"),
            supports_json_mode: true,
            supports_system_role: true,
            modalities: vec![Modality::Text],
            updated_at: chrono::Utc::now(),
        }
    }

    fn validate_config(&self) -> Result<(), HelixError> {
        if self.config.model.trim().is_empty() {
            return Err(HelixError::ConfigError("ollama: model must not be empty".into()));
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
            .filter_map(|m| m.get("model"))
            .filter_map(Value::as_str)
            .map(String::from)
            .collect())
    }
}

fn list_models_request(adapter: &OllamaAdapter) -> Result<http::Request<Vec<u8>>, HelixError> {
    let url = adapter.config.base_url.join("api/tags").map_err(HelixError::from)?;
    let mut builder = http::Request::builder()
        .method(http::Method::GET)
        .uri(url.to_string())
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(credential) = &adapter.credential {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {}", credential.expose()));
    }
    builder.body(Vec::new()).map_err(HelixError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::SamplingParams;

    fn adapter() -> OllamaAdapter {
        OllamaAdapter::new(
            OllamaConfig {
                base_url: OllamaConfig::default_base_url(),
                model: "llama3:8b".to_string(),
                timeout_seconds: None,
                reasoning: None,
                system: None,
                max_tokens: None,
                temperature: None,
                top_k: None,
                top_p: None,
                min_p: None,
                typical_p: None,
                repeat_last_n: None,
                repeat_penalty: None,
                presence_penalty: None,
                frequency_penalty: None,
                seed: None,
                num_ctx: Some(4096),
            },
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn request_has_no_auth_header_without_credential() {
        let adapter = adapter();
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let wire = ollama_request(&adapter, &request, false).unwrap();
        assert!(wire.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn ndjson_framing_splits_on_newlines_across_chunks() {
        use futures::stream;
        use futures::StreamExt;
        let chunks: Vec<Result<bytes::Bytes, HelixError>> = vec![
            Ok(bytes::Bytes::from_static(b"{\"done\":false")),
            Ok(bytes::Bytes::from_static(b"}\n{\"done\":true}\n")),
        ];
        let input = stream::iter(chunks).boxed();
        let mut framed = frame_ndjson(input);
        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), "{\"done\":false}");
    }

    #[test]
    fn tool_calls_take_precedence_over_done_reason() {
        let finish = parse_finish_reason(Some("stop"), true);
        assert_eq!(finish, FinishReason::ToolCalls);
    }
}
