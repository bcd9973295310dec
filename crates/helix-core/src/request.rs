use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::message::{ChatMessage, Tool, ToolChoice};

/// Sampling parameters, carried verbatim from the north face through to
/// whichever adapter ends up serving the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Normalized input to a provider adapter, the ensemble engine, or the
/// debate orchestrator. `fingerprint()` derives a stable idempotency key
/// from messages and sampling parameters alone — it deliberately ignores
/// `stream`, which does not affect the deterministic content of a
/// `temperature=0` response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    /// Hashes messages and sampling parameters into a stable
    /// request-fingerprint string, used by `CacheStore` lookups and for
    /// detecting duplicate in-flight requests. Two semantically equal
    /// requests always hash identically within a process; the hash is
    /// not guaranteed stable across HelixAgent versions.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for message in &self.messages {
            message.role.hash_into(&mut hasher);
            message.content.hash(&mut hasher);
            message.name.hash(&mut hasher);
        }
        format!("{:?}", self.sampling.temperature.map(f32::to_bits)).hash(&mut hasher);
        format!("{:?}", self.sampling.top_p.map(f32::to_bits)).hash(&mut hasher);
        self.sampling.max_tokens.hash(&mut hasher);
        self.sampling.stop.hash(&mut hasher);
        format!("{:?}", self.sampling.presence_penalty.map(f32::to_bits)).hash(&mut hasher);
        format!("{:?}", self.sampling.frequency_penalty.map(f32::to_bits)).hash(&mut hasher);
        self.sampling.seed.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Whether this request is eligible for `CacheStore` lookup: the
    /// specification restricts caching to deterministic, non-streaming
    /// requests (`temperature=0`, no streaming).
    pub fn is_cacheable(&self) -> bool {
        !self.stream && matches!(self.sampling.temperature, Some(t) if t == 0.0)
    }
}

impl crate::message::ChatRole {
    fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.hash(hasher);
    }
}

impl Hash for crate::message::ChatRole {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_identical_requests() {
        let req = CompletionRequest {
            messages: vec![ChatMessage::user("2+2?")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams {
                temperature: Some(0.0),
                ..Default::default()
            },
            stream: false,
        };
        let req2 = req.clone();
        assert_eq!(req.fingerprint(), req2.fingerprint());
        assert!(req.is_cacheable());
    }

    #[test]
    fn fingerprint_differs_on_content() {
        let base = CompletionRequest {
            messages: vec![ChatMessage::user("2+2?")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        };
        let mut other = base.clone();
        other.messages[0].content = "3+3?".into();
        assert_ne!(base.fingerprint(), other.fingerprint());
    }

    #[test]
    fn streaming_requests_are_not_cacheable() {
        let req = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams {
                temperature: Some(0.0),
                ..Default::default()
            },
            stream: true,
        };
        assert!(!req.is_cacheable());
    }
}
