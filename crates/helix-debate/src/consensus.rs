//! Agreement-matrix and consensus computation (§4.4). The specification
//! leaves the exact text-similarity metric open; SPEC_FULL.md §13
//! resolves it to token-Jaccard similarity over whitespace/case
//! normalized tokens, the cheapest metric that needs no embedding model
//! or external service.

use std::collections::HashSet;

use helix_core::Contribution;

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|word| !word.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Builds the symmetric NxN agreement matrix over `contributions` and
/// the scalar consensus score (the mean of the matrix's off-diagonal
/// entries). A single contribution trivially has consensus `1.0`; zero
/// contributions has consensus `0.0`.
pub fn agreement_matrix(contributions: &[Contribution]) -> (Vec<Vec<f32>>, f32) {
    let n = contributions.len();
    if n == 0 {
        return (Vec::new(), 0.0);
    }
    let token_sets: Vec<HashSet<String>> = contributions
        .iter()
        .map(|c| tokenize(&c.content))
        .collect();

    let mut matrix = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let score = jaccard(&token_sets[i], &token_sets[j]);
            matrix[i][j] = score;
            matrix[j][i] = score;
        }
    }

    let consensus = if n == 1 {
        1.0
    } else {
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for i in 0..n {
            for j in (i + 1)..n {
                sum += matrix[i][j];
                count += 1;
            }
        }
        sum / count as f32
    };

    (matrix, consensus)
}

/// Synthesizes a consensus answer by picking the contribution with the
/// highest mean agreement to its peers — the most "central" answer
/// rather than any one participant's role taking precedence.
pub fn synthesize(contributions: &[Contribution], matrix: &[Vec<f32>]) -> Option<String> {
    if contributions.is_empty() {
        return None;
    }
    if contributions.len() == 1 {
        return Some(contributions[0].content.clone());
    }
    contributions
        .iter()
        .enumerate()
        .max_by(|(i, _), (j, _)| {
            let avg_i: f32 = matrix[*i].iter().sum::<f32>() / matrix[*i].len() as f32;
            let avg_j: f32 = matrix[*j].iter().sum::<f32>() / matrix[*j].len() as f32;
            avg_i.partial_cmp(&avg_j).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| contributions[idx].content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(content: &str) -> Contribution {
        Contribution {
            participant_id: "p".into(),
            content: content.into(),
            tokens: 0,
            latency_ms: 0,
            tool_calls: None,
            score: None,
        }
    }

    #[test]
    fn identical_contributions_have_full_agreement() {
        let contributions = vec![contribution("the sky is blue"), contribution("The Sky Is Blue")];
        let (matrix, consensus) = agreement_matrix(&contributions);
        assert_eq!(matrix[0][1], 1.0);
        assert_eq!(consensus, 1.0);
    }

    #[test]
    fn disjoint_contributions_have_zero_agreement() {
        let contributions = vec![contribution("alpha beta"), contribution("gamma delta")];
        let (_matrix, consensus) = agreement_matrix(&contributions);
        assert_eq!(consensus, 0.0);
    }

    #[test]
    fn single_contribution_is_trivially_consensual() {
        let contributions = vec![contribution("solo")];
        let (matrix, consensus) = agreement_matrix(&contributions);
        assert_eq!(matrix, vec![vec![1.0]]);
        assert_eq!(consensus, 1.0);
    }

    #[test]
    fn synthesize_picks_most_central_contribution() {
        let contributions = vec![
            contribution("the answer is four"),
            contribution("the answer is four"),
            contribution("completely different text here"),
        ];
        let (matrix, _) = agreement_matrix(&contributions);
        let winner = synthesize(&contributions, &matrix).unwrap();
        assert_eq!(winner, "the answer is four");
    }
}
