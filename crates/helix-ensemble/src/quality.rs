//! Post-hoc quality scoring (§4.3): a scalar in `[0,1]` folding four
//! signals — non-empty content, finish-reason goodness, JSON-mode
//! adherence, and absence of content-filter/refusal markers. The exact
//! weighting is configuration, but every implementation must fold all
//! four signals; this module is the one place that happens.

use helix_core::{CompletionRequest, CompletionResponse, FinishReason};
use serde::{Deserialize, Serialize};

/// Weights applied to the four quality signals. Configuration, per §4.3
/// ("the exact weighting is a configuration"); defaults split evenly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityWeights {
    pub non_empty: f32,
    pub finish_reason: f32,
    pub schema_adherence: f32,
    pub no_refusal: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            non_empty: 0.25,
            finish_reason: 0.25,
            schema_adherence: 0.25,
            no_refusal: 0.25,
        }
    }
}

/// Crude refusal-marker detection; a real implementation might ask a
/// classifier, but the specification only demands the signal exist.
const REFUSAL_MARKERS: &[&str] = &[
    "i cannot assist",
    "i can't assist",
    "i'm not able to help",
    "i am not able to help",
    "as an ai language model, i cannot",
];

fn finish_reason_goodness(reason: FinishReason) -> f32 {
    match reason {
        FinishReason::Stop => 1.0,
        FinishReason::ToolCalls => 0.8,
        FinishReason::Length => 0.6,
        FinishReason::ContentFilter => 0.2,
        FinishReason::Error => 0.0,
    }
}

fn schema_adherence(request: &CompletionRequest, text: &str) -> f32 {
    let expects_json = request
        .tools
        .as_ref()
        .map(|t| !t.is_empty())
        .unwrap_or(false);
    if !expects_json {
        return 1.0;
    }
    if serde_json::from_str::<serde_json::Value>(text).is_ok() {
        1.0
    } else {
        0.0
    }
}

fn contains_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    REFUSAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Computes the quality score for one completed branch, per §4.3's four
/// signals combined by `weights`.
pub fn quality_score(
    request: &CompletionRequest,
    response: &CompletionResponse,
    weights: QualityWeights,
) -> f32 {
    let text = response.text().unwrap_or_default();
    let non_empty = if text.trim().is_empty() { 0.0 } else { 1.0 };

    let finish_reason = response
        .choices
        .first()
        .map(|c| finish_reason_goodness(c.finish_reason))
        .unwrap_or(0.0);

    let schema = schema_adherence(request, text);

    let no_refusal = if contains_refusal(text) { 0.0 } else { 1.0 };
    let is_filtered = response
        .choices
        .first()
        .map(|c| c.finish_reason == FinishReason::ContentFilter)
        .unwrap_or(false);
    let no_refusal = if is_filtered { 0.0 } else { no_refusal };

    let total_weight =
        weights.non_empty + weights.finish_reason + weights.schema_adherence + weights.no_refusal;
    if total_weight <= 0.0 {
        return 0.0;
    }

    let weighted = weights.non_empty * non_empty
        + weights.finish_reason * finish_reason
        + weights.schema_adherence * schema
        + weights.no_refusal * no_refusal;

    (weighted / total_weight).clamp(0.0, 1.0)
}

/// Normalizes text for majority-vote equivalence comparisons: trims,
/// lowercases, and collapses internal whitespace runs.
pub fn normalize_for_vote(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::{ChatMessage, Choice, SamplingParams, Usage};
    use chrono::Utc;

    fn response_with(text: &str, finish_reason: FinishReason) -> CompletionResponse {
        CompletionResponse {
            id: "r1".into(),
            created_at: Utc::now(),
            model_id: "m".into(),
            provider_id: "p".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(text),
                finish_reason,
            }],
            usage: Usage::default(),
            latency_ms: 10,
            quality_score: None,
        }
    }

    fn base_request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: None,
            tool_choice: None,
            sampling: SamplingParams::default(),
            stream: false,
        }
    }

    #[test]
    fn clean_stop_response_scores_near_one() {
        let score = quality_score(
            &base_request(),
            &response_with("4", FinishReason::Stop),
            QualityWeights::default(),
        );
        assert!(score > 0.95, "expected near-perfect score, got {score}");
    }

    #[test]
    fn empty_content_filter_response_scores_zero() {
        let score = quality_score(
            &base_request(),
            &response_with("", FinishReason::ContentFilter),
            QualityWeights::default(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn refusal_marker_drags_score_down() {
        let score = quality_score(
            &base_request(),
            &response_with("I cannot assist with that request.", FinishReason::Stop),
            QualityWeights::default(),
        );
        assert!(score < 0.9);
    }

    #[test]
    fn normalization_ignores_case_and_whitespace() {
        assert_eq!(normalize_for_vote("  Four  \n"), normalize_for_vote("four"));
    }
}
