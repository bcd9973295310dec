use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;

/// Where a `VerifiedModel` entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Discovery,
    Manual,
    ModelsDev,
}

/// Outcome of running the probe battery against one model (§4.5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub passed_tests: Vec<String>,
    pub code_visible: bool,
    pub probed_at: DateTime<Utc>,
}

impl Verification {
    /// A model is `verified` iff `code_visibility` passes and at least 5
    /// of the remaining 7 probes pass (§4.5.2). `code_visible` is tracked
    /// separately; `passed_tests` holds the other probe names.
    pub fn is_verified(&self) -> bool {
        self.code_visible && self.passed_tests.len() >= 5
    }
}

/// The five scoring components, each in `[0, 10]`, combined into
/// `overall_0_10` by the fixed weights in §4.5.3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score {
    pub response_speed: f32,
    pub efficiency: f32,
    pub cost: f32,
    pub capability: f32,
    pub recency: f32,
    pub overall_0_10: f32,
}

impl Score {
    pub const WEIGHT_SPEED: f32 = 0.25;
    pub const WEIGHT_EFFICIENCY: f32 = 0.20;
    pub const WEIGHT_COST: f32 = 0.25;
    pub const WEIGHT_CAPABILITY: f32 = 0.20;
    pub const WEIGHT_RECENCY: f32 = 0.10;
    /// Bonus applied to OAuth-authenticated providers, capped at 10.
    pub const OAUTH_BONUS: f32 = 0.5;
    /// Models below this are excluded from `Select` (§4.5.3, invariant).
    pub const MIN_SELECTABLE: f32 = 5.0;

    /// Computes `overall_0_10` from the four weighted components plus an
    /// optional OAuth bonus, clamped to the valid range.
    pub fn compute(
        response_speed: f32,
        efficiency: f32,
        cost: f32,
        capability: f32,
        recency: f32,
        oauth_authenticated: bool,
    ) -> Self {
        let weighted = Self::WEIGHT_SPEED * response_speed
            + Self::WEIGHT_EFFICIENCY * efficiency
            + Self::WEIGHT_COST * cost
            + Self::WEIGHT_CAPABILITY * capability
            + Self::WEIGHT_RECENCY * recency;
        let bonus = if oauth_authenticated {
            Self::OAUTH_BONUS
        } else {
            0.0
        };
        let overall_0_10 = (weighted + bonus).min(10.0);
        Self {
            response_speed,
            efficiency,
            cost,
            capability,
            recency,
            overall_0_10,
        }
    }

    pub fn is_selectable(&self) -> bool {
        self.overall_0_10 >= Self::MIN_SELECTABLE
    }

    pub fn zeroed() -> Self {
        Self {
            response_speed: 0.0,
            efficiency: 0.0,
            cost: 0.0,
            capability: 0.0,
            recency: 0.0,
            overall_0_10: 0.0,
        }
    }
}

/// A `(provider, model)` pair that has passed the Verifier's probe
/// battery and been scored; the Registry only ever returns these from
/// `Select`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedModel {
    pub capabilities: Capabilities,
    pub verification: Verification,
    pub score: Score,
    pub source: ModelSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_bonus_is_capped_at_ten() {
        let score = Score::compute(10.0, 10.0, 10.0, 10.0, 10.0, true);
        assert_eq!(score.overall_0_10, 10.0);
    }

    #[test]
    fn below_threshold_is_not_selectable() {
        let score = Score::compute(2.0, 2.0, 2.0, 2.0, 2.0, false);
        assert!(!score.is_selectable());
    }
}
