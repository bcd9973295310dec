//! Selection phase (§4.5.4): top-K by overall score, with a
//! provider-diversity preference — no more than `ceil(K/2)` entries from
//! the same provider, unless only one provider has any selectable
//! models at all.

use std::collections::{HashMap, HashSet};

use helix_core::VerifiedModel;

pub fn select_top_k(mut models: Vec<VerifiedModel>, k: usize) -> Vec<VerifiedModel> {
    models.retain(|m| m.score.is_selectable());
    models.sort_by(|a, b| {
        b.score
            .overall_0_10
            .partial_cmp(&a.score.overall_0_10)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.capabilities.provider_id.cmp(&b.capabilities.provider_id))
            .then_with(|| a.capabilities.model_id.cmp(&b.capabilities.model_id))
    });

    let distinct_providers: HashSet<&str> =
        models.iter().map(|m| m.capabilities.provider_id.as_str()).collect();
    let single_provider = distinct_providers.len() <= 1;
    let max_per_provider = k.saturating_add(1) / 2;

    let mut per_provider: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(k.min(models.len()));
    for model in models {
        if out.len() == k {
            break;
        }
        let count = per_provider.entry(model.capabilities.provider_id.clone()).or_insert(0);
        if !single_provider && *count >= max_per_provider {
            continue;
        }
        *count += 1;
        out.push(model);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use helix_core::{Capabilities, ModelSource, Score, Verification};

    fn model(provider_id: &str, model_id: &str, overall: f32) -> VerifiedModel {
        VerifiedModel {
            capabilities: Capabilities {
                provider_id: provider_id.to_string(),
                model_id: model_id.to_string(),
                max_context_tokens: 128_000,
                supports_streaming: true,
                supports_tools: false,
                supports_vision: false,
                supports_json_mode: false,
                supports_system_role: true,
                modalities: vec![],
                updated_at: Utc::now(),
            },
            verification: Verification {
                passed_tests: vec!["existence".into()],
                code_visible: true,
                probed_at: Utc::now(),
            },
            score: Score::compute(overall, overall, overall, overall, overall, false),
            source: ModelSource::Discovery,
        }
    }

    #[test]
    fn excludes_models_below_selectable_threshold() {
        let models = vec![model("a", "m1", 2.0)];
        assert!(select_top_k(models, 5).is_empty());
    }

    #[test]
    fn caps_models_per_provider_when_multiple_providers_are_healthy() {
        let models = vec![
            model("a", "m1", 9.0),
            model("a", "m2", 8.5),
            model("a", "m3", 8.0),
            model("b", "m1", 7.0),
        ];
        // k=4, max_per_provider = ceil(4/2) = 2
        let selected = select_top_k(models, 4);
        let from_a = selected.iter().filter(|m| m.capabilities.provider_id == "a").count();
        assert_eq!(from_a, 2);
        assert_eq!(selected.len(), 3, "only 3 models clear the cap: a/m1, a/m2, b/m1");
    }

    #[test]
    fn allows_exceeding_the_cap_when_only_one_provider_is_healthy() {
        let models = vec![
            model("a", "m1", 9.0),
            model("a", "m2", 8.5),
            model("a", "m3", 8.0),
        ];
        let selected = select_top_k(models, 3);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn orders_by_overall_score_descending() {
        let models = vec![model("a", "m1", 6.0), model("b", "m1", 9.0)];
        let selected = select_top_k(models, 5);
        assert_eq!(selected[0].capabilities.provider_id, "b");
    }
}
