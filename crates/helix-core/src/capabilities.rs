use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A modality a model can accept or emit beyond plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Pdf,
}

/// Static-ish capability record for one `(provider_id, model_id)` pair.
/// Produced by an adapter's `Capabilities()` method (pure, cached) and
/// refreshed by the Verifier; stale beyond its TTL it must not be
/// returned by the Registry (invariant a, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub provider_id: String,
    pub model_id: String,
    pub max_context_tokens: u32,
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub supports_json_mode: bool,
    pub supports_system_role: bool,
    pub modalities: Vec<Modality>,
    pub updated_at: DateTime<Utc>,
}

impl Capabilities {
    /// TTL for capability freshness, per invariant (a): 24 hours.
    pub const FRESHNESS_TTL_SECS: i64 = 24 * 60 * 60;

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.updated_at).num_seconds() > Self::FRESHNESS_TTL_SECS
    }
}
