//! The 5-component scoring model (§4.5.3): `Score::compute`
//! (`helix-core`) fixes the weights and the OAuth bonus; this module
//! derives the five `[0, 10]` component inputs from a `ProbeReport`,
//! the model's `Capabilities`, and the optional catalog/pricing data
//! (§12 "Pricing-aware cost scoring").

use chrono::{DateTime, Utc};
use helix_core::{Capabilities, Score};

use crate::catalog::ModelPricing;
use crate::probes::ProbeReport;

/// `response_speed`: full marks at or under 300ms, fading linearly to
/// zero at 5s and beyond. A model with no measured latency (every probe
/// that would have reported one failed or timed out) scores zero.
fn response_speed_score(latency_ms: Option<u64>) -> f32 {
    match latency_ms {
        None => 0.0,
        Some(ms) if ms <= 300 => 10.0,
        Some(ms) if ms >= 5_000 => 0.0,
        Some(ms) => 10.0 - (ms as f32 - 300.0) * (10.0 / 4_700.0),
    }
}

/// `efficiency`: rewards a completion length close to a 200-token
/// reference point — neither truncated nor needlessly verbose for the
/// bounded probe prompts this battery sends.
fn efficiency_score(completion_tokens: Option<u32>) -> f32 {
    const TARGET: f32 = 200.0;
    match completion_tokens {
        None => 5.0,
        Some(tokens) => {
            let ratio = tokens as f32 / TARGET;
            (10.0 - (ratio - 1.0).abs() * 5.0).clamp(0.0, 10.0)
        }
    }
}

/// `cost`: cheaper per-million-token pricing scores higher. Unknown
/// pricing (no catalog wired in, or the model is absent from the feed)
/// scores a neutral midpoint rather than penalizing the model.
fn cost_score(pricing: Option<&ModelPricing>) -> f32 {
    match pricing {
        None => 5.0,
        Some(p) => {
            let blended = p.prompt_cost_per_million + p.completion_cost_per_million;
            (10.0 - blended / 2.0).clamp(0.0, 10.0)
        }
    }
}

/// `capability`: a base score for showing up at all, plus credit for
/// genuine tool/vision/JSON-mode support and for passing the
/// `function_calling`/`coding_capability` probes (static capability
/// metadata alone can be aspirational; the probe result is what the
/// model actually demonstrated).
fn capability_score(caps: &Capabilities, passed_tests: &[String]) -> f32 {
    let mut score: f32 = 4.0;
    if caps.supports_tools && passed_tests.iter().any(|t| t == "function_calling") {
        score += 2.0;
    }
    if caps.supports_vision {
        score += 1.0;
    }
    if caps.supports_json_mode {
        score += 1.0;
    }
    if passed_tests.iter().any(|t| t == "coding_capability") {
        score += 2.0;
    }
    score.min(10.0)
}

/// `recency`: full marks for a model released within the last two
/// months, fading to zero over the following year. Unknown release
/// dates (no catalog entry) score a neutral midpoint.
fn recency_score(release_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
    match release_date {
        None => 5.0,
        Some(released) => {
            let age_days = (now - released).num_days().max(0) as f32;
            (10.0 - age_days / 40.0).clamp(0.0, 10.0)
        }
    }
}

/// Computes the full `Score` for one verified model (§4.5.3). Callers
/// only reach this for models whose `Verification::is_verified()` is
/// true; an unverified model's score is `Score::zeroed()` regardless of
/// what these components would otherwise say (§4.5 "Failure handling").
pub fn compute(
    caps: &Capabilities,
    report: &ProbeReport,
    pricing: Option<&ModelPricing>,
    release_date: Option<DateTime<Utc>>,
    oauth_authenticated: bool,
) -> Score {
    Score::compute(
        response_speed_score(report.latency_ms),
        efficiency_score(report.completion_tokens),
        cost_score(pricing),
        capability_score(caps, &report.passed_tests),
        recency_score(release_date, Utc::now()),
        oauth_authenticated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            provider_id: "claude".into(),
            model_id: "claude-3-5-sonnet".into(),
            max_context_tokens: 200_000,
            supports_streaming: true,
            supports_tools: true,
            supports_vision: true,
            supports_json_mode: true,
            supports_system_role: true,
            modalities: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fast_responder_scores_a_perfect_response_speed() {
        assert_eq!(response_speed_score(Some(120)), 10.0);
    }

    #[test]
    fn missing_latency_measurement_scores_zero_speed() {
        assert_eq!(response_speed_score(None), 0.0);
    }

    #[test]
    fn capability_score_rewards_passed_probes_and_real_capability_bits() {
        let report = ProbeReport {
            passed_tests: vec!["function_calling".into(), "coding_capability".into()],
            code_visible: true,
            latency_ms: Some(200),
            completion_tokens: Some(180),
        };
        let score = capability_score(&caps(), &report.passed_tests);
        assert_eq!(score, 10.0);
    }

    #[test]
    fn unknown_pricing_is_neutral_not_punitive() {
        assert_eq!(cost_score(None), 5.0);
    }
}
