use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, ToolCall};

/// Why a choice stopped generating. `Error` is reserved for the terminal
/// chunk of a failed stream (§3); a non-streaming response that fails
/// surfaces as `HelixError`/`ApiError` instead of a choice with this
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
}

/// Token accounting for a single completion, aliased across vendor
/// response shapes the way the teacher's `Usage` type aliases field
/// names per-provider; here each adapter is responsible for normalizing
/// onto this shape itself rather than relying on serde aliases, since
/// HelixAgent adapters parse vendor JSON into vendor-local structs first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One generated alternative within a `CompletionResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// A single-shot completion result, uniform across all fourteen vendors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
    pub provider_id: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub latency_ms: u64,
    /// Populated by the Ensemble Engine's post-hoc scoring (§4.3); absent
    /// for a bare single-provider completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
}

impl CompletionResponse {
    /// Convenience accessor for the first choice's text, the common case
    /// for non-tool-calling completions.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Incremental delta carried by one `StreamChunk`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<crate::message::ChatRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One frame of a streaming completion. Chunks sharing `id` belong to
/// the same logical response; the terminal chunk carries a non-empty
/// `finish_reason` (invariant e, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub index: u32,
    pub delta: Delta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Present only on the terminal chunk of a failed stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::ApiError>,
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }

    pub fn terminal_error(id: impl Into<String>, index: u32, error: crate::error::ApiError) -> Self {
        Self {
            id: id.into(),
            index,
            delta: Delta::default(),
            finish_reason: Some(FinishReason::Error),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let resp = CompletionResponse {
            id: "cmpl-1".into(),
            created_at: Utc::now(),
            model_id: "claude-3".into(),
            provider_id: "claude".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant("4"),
                finish_reason: FinishReason::Stop,
            }],
            usage: Usage {
                prompt_tokens: 5,
                completion_tokens: 1,
                total_tokens: 6,
            },
            latency_ms: 120,
            quality_score: Some(0.9),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: CompletionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, resp.id);
        assert_eq!(back.choices[0].message.content, "4");
    }

    #[test]
    fn terminal_chunk_carries_error_and_finish_reason() {
        let chunk = StreamChunk::terminal_error(
            "cmpl-2",
            0,
            crate::error::ApiError::new(crate::error::ErrorKind::Timeout, "upstream timed out"),
        );
        assert!(chunk.is_terminal());
        assert_eq!(chunk.finish_reason, Some(FinishReason::Error));
        assert!(chunk.error.is_some());
    }
}
