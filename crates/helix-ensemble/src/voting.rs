//! Voting strategies over a completed set of ensemble branches (§4.3).
//! The set is small and closed, so it is a tagged enum rather than an
//! open trait hierarchy (§9 "small closed sets are tagged variants").

use std::collections::HashMap;

use helix_core::CompletionResponse;
use serde::{Deserialize, Serialize};

use crate::quality::normalize_for_vote;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Plurality vote over normalized response text; ties broken by
    /// highest quality score, then by provider id.
    Majority,
    /// Highest `provider_weight * quality_score`.
    Weighted,
    /// Majority vote, but only declared if the winning group's share of
    /// participating branches reaches `threshold`; otherwise falls back
    /// to `Weighted` (§4.3, §13 Open Question resolution).
    Consensus { threshold: f32 },
    /// Highest branch-reported confidence (falls back to quality score
    /// when a branch carries no confidence signal).
    ConfidenceWeighted,
    /// Highest post-hoc quality score alone.
    QualityWeighted,
}

/// One successfully completed branch, ready to be voted over.
#[derive(Clone)]
pub struct Ballot {
    pub provider_id: String,
    pub response: CompletionResponse,
    pub quality_score: f32,
    pub confidence: Option<f32>,
    pub weight: f32,
}

fn majority_winner(ballots: &[Ballot]) -> Option<usize> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, ballot) in ballots.iter().enumerate() {
        let key = ballot
            .response
            .text()
            .map(normalize_for_vote)
            .unwrap_or_default();
        groups.entry(key).or_default().push(idx);
    }

    let mut best: Option<(usize, f32, &str)> = None;
    for indices in groups.values() {
        // Within a tied group, prefer the highest quality score, then
        // lexicographically lowest provider_id for determinism.
        let representative = indices
            .iter()
            .copied()
            .max_by(|&a, &b| {
                ballots[a]
                    .quality_score
                    .partial_cmp(&ballots[b].quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ballots[b].provider_id.cmp(&ballots[a].provider_id))
            })
            .expect("group is non-empty");

        let group_size = indices.len() as f32;
        let candidate_provider = ballots[representative].provider_id.as_str();
        let better = match &best {
            None => true,
            Some((_, best_size, best_provider)) => {
                group_size > *best_size
                    || (group_size == *best_size && candidate_provider < *best_provider)
            }
        };
        if better {
            best = Some((representative, group_size, candidate_provider));
        }
    }
    best.map(|(idx, _, _)| idx)
}

fn largest_group_share(ballots: &[Ballot]) -> f32 {
    let mut groups: HashMap<String, usize> = HashMap::new();
    for ballot in ballots {
        let key = ballot
            .response
            .text()
            .map(normalize_for_vote)
            .unwrap_or_default();
        *groups.entry(key).or_insert(0) += 1;
    }
    let largest = groups.values().copied().max().unwrap_or(0) as f32;
    if ballots.is_empty() {
        0.0
    } else {
        largest / ballots.len() as f32
    }
}

fn weighted_winner(ballots: &[Ballot]) -> Option<usize> {
    ballots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            (a.weight * a.quality_score)
                .partial_cmp(&(b.weight * b.quality_score))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.provider_id.cmp(&a.provider_id))
        })
        .map(|(idx, _)| idx)
}

fn confidence_winner(ballots: &[Ballot]) -> Option<usize> {
    ballots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            let ca = a.confidence.unwrap_or(a.quality_score);
            let cb = b.confidence.unwrap_or(b.quality_score);
            ca.partial_cmp(&cb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.provider_id.cmp(&a.provider_id))
        })
        .map(|(idx, _)| idx)
}

fn quality_winner(ballots: &[Ballot]) -> Option<usize> {
    ballots
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.quality_score
                .partial_cmp(&b.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.provider_id.cmp(&a.provider_id))
        })
        .map(|(idx, _)| idx)
}

/// Applies `strategy` to `ballots`, returning the index of the winning
/// branch. `ballots` must be non-empty; the caller is responsible for
/// having already enforced `min_successful_branches`/quorum (§4.3).
pub fn decide(strategy: &VotingStrategy, ballots: &[Ballot]) -> Option<usize> {
    if ballots.is_empty() {
        return None;
    }
    match strategy {
        VotingStrategy::Majority => majority_winner(ballots),
        VotingStrategy::Weighted => weighted_winner(ballots),
        VotingStrategy::Consensus { threshold } => {
            if largest_group_share(ballots) >= *threshold {
                majority_winner(ballots)
            } else {
                weighted_winner(ballots)
            }
        }
        VotingStrategy::ConfidenceWeighted => confidence_winner(ballots),
        VotingStrategy::QualityWeighted => quality_winner(ballots),
    }
}

/// The minimum number of completed branches (success or failure) that
/// must be observed before `Majority`/`Consensus` may declare a winner,
/// per §4.3: "wait for at least `ceil(N/2)+1` branches... but never past
/// the deadline".
pub fn quorum_for(strategy: &VotingStrategy, total_branches: usize) -> usize {
    match strategy {
        VotingStrategy::Majority | VotingStrategy::Consensus { .. } => {
            (total_branches.div_ceil(2) + 1).min(total_branches)
        }
        VotingStrategy::Weighted | VotingStrategy::ConfidenceWeighted | VotingStrategy::QualityWeighted => {
            total_branches
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use helix_core::{ChatMessage, Choice, FinishReason, Usage};

    fn ballot(provider_id: &str, text: &str, quality: f32, weight: f32) -> Ballot {
        Ballot {
            provider_id: provider_id.into(),
            response: CompletionResponse {
                id: "r".into(),
                created_at: Utc::now(),
                model_id: "m".into(),
                provider_id: provider_id.into(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant(text),
                    finish_reason: FinishReason::Stop,
                }],
                usage: Usage::default(),
                latency_ms: 10,
                quality_score: Some(quality),
            },
            quality_score: quality,
            confidence: None,
            weight,
        }
    }

    #[test]
    fn majority_picks_largest_agreeing_group() {
        let ballots = vec![
            ballot("a", "four", 0.9, 1.0),
            ballot("b", "Four", 0.8, 1.0),
            ballot("c", "5", 0.95, 1.0),
        ];
        let winner = decide(&VotingStrategy::Majority, &ballots).unwrap();
        assert!(ballots[winner].provider_id == "a" || ballots[winner].provider_id == "b");
    }

    #[test]
    fn weighted_prefers_higher_weight_times_quality() {
        let ballots = vec![ballot("a", "x", 0.5, 2.0), ballot("b", "y", 0.9, 1.0)];
        let winner = decide(&VotingStrategy::Weighted, &ballots).unwrap();
        assert_eq!(ballots[winner].provider_id, "a");
    }

    #[test]
    fn consensus_falls_back_to_weighted_below_threshold() {
        let ballots = vec![
            ballot("a", "x", 0.5, 2.0),
            ballot("b", "y", 0.9, 1.0),
            ballot("c", "z", 0.1, 0.1),
        ];
        let winner = decide(&VotingStrategy::Consensus { threshold: 0.67 }, &ballots).unwrap();
        assert_eq!(ballots[winner].provider_id, "a");
    }

    #[test]
    fn quorum_for_majority_is_ceil_half_plus_one() {
        assert_eq!(quorum_for(&VotingStrategy::Majority, 5), 4);
        assert_eq!(quorum_for(&VotingStrategy::Majority, 4), 3);
        assert_eq!(quorum_for(&VotingStrategy::Majority, 1), 1);
        assert_eq!(quorum_for(&VotingStrategy::Weighted, 4), 4);
    }
}
