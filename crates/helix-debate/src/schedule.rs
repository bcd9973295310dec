//! Participant scheduling per `DebateStrategy` (§4.4). Returns the
//! within-round participant order (as indices into the session's
//! participant list) and whether that strategy runs its round
//! sequentially — each participant sees prior contributions from the
//! *same* round — or concurrently, where every participant only ever
//! sees prior rounds.

use helix_core::{DebateStrategy, Participant, ParticipantRole};

/// Whether `strategy` runs participants one after another within a
/// round (so each can react to what came before) or all at once.
pub fn is_sequential(strategy: DebateStrategy) -> bool {
    matches!(
        strategy,
        DebateStrategy::RoundRobin | DebateStrategy::Structured | DebateStrategy::Adversarial
    )
}

/// Computes the order participants act in during `round_index`,
/// returning indices into `participants`.
pub fn order_for(strategy: DebateStrategy, participants: &[Participant], round_index: u32) -> Vec<usize> {
    match strategy {
        DebateStrategy::RoundRobin => round_robin_order(participants, round_index),
        DebateStrategy::FreeForm | DebateStrategy::Collaborative => {
            let mut indices: Vec<usize> = (0..participants.len()).collect();
            indices.sort_by_key(|&i| std::cmp::Reverse(participants[i].priority));
            indices
        }
        DebateStrategy::Structured => structured_order(participants),
        DebateStrategy::Adversarial => adversarial_order(participants),
    }
}

fn round_robin_order(participants: &[Participant], round_index: u32) -> Vec<usize> {
    let n = participants.len();
    if n == 0 {
        return Vec::new();
    }
    let start = round_index as usize % n;
    (0..n).map(|i| (start + i) % n).collect()
}

const STRUCTURED_PHASES: [ParticipantRole; 5] = [
    ParticipantRole::Analyst,
    ParticipantRole::Proposer,
    ParticipantRole::Critic,
    ParticipantRole::Synthesizer,
    ParticipantRole::Mediator,
];

fn structured_order(participants: &[Participant]) -> Vec<usize> {
    let mut order = Vec::with_capacity(participants.len());
    for role in STRUCTURED_PHASES.iter() {
        for (idx, participant) in participants.iter().enumerate() {
            if &participant.role == role {
                order.push(idx);
            }
        }
    }
    let mut leftover: Vec<usize> = (0..participants.len())
        .filter(|idx| !order.contains(idx))
        .collect();
    leftover.sort_by_key(|&i| std::cmp::Reverse(participants[i].priority));
    order.extend(leftover);
    order
}

fn adversarial_order(participants: &[Participant]) -> Vec<usize> {
    let mut proposers = Vec::new();
    let mut critics = Vec::new();
    let mut mediators = Vec::new();
    let mut others = Vec::new();

    for (idx, participant) in participants.iter().enumerate() {
        match participant.role {
            ParticipantRole::Proposer => proposers.push(idx),
            ParticipantRole::Critic => critics.push(idx),
            ParticipantRole::Mediator => mediators.push(idx),
            _ => others.push(idx),
        }
    }

    let mut order = Vec::with_capacity(participants.len());
    for k in 0..proposers.len().max(critics.len()) {
        if let Some(&idx) = proposers.get(k) {
            order.push(idx);
        }
        if let Some(&idx) = critics.get(k) {
            order.push(idx);
        }
    }
    order.extend(others);
    order.extend(mediators);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::ProviderModelRef;

    fn participant(id: &str, role: ParticipantRole) -> Participant {
        Participant::new(id, role, vec![ProviderModelRef {
            provider_id: "p".into(),
            model_id: "m".into(),
        }])
    }

    #[test]
    fn round_robin_rotates_start_each_round() {
        let participants = vec![
            participant("a", ParticipantRole::Analyst),
            participant("b", ParticipantRole::Critic),
            participant("c", ParticipantRole::Proposer),
        ];
        assert_eq!(order_for(DebateStrategy::RoundRobin, &participants, 0), vec![0, 1, 2]);
        assert_eq!(order_for(DebateStrategy::RoundRobin, &participants, 1), vec![1, 2, 0]);
    }

    #[test]
    fn structured_runs_analyst_before_critic() {
        let participants = vec![
            participant("a", ParticipantRole::Critic),
            participant("b", ParticipantRole::Analyst),
        ];
        let order = order_for(DebateStrategy::Structured, &participants, 0);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn adversarial_interleaves_proposer_and_critic_then_mediator_last() {
        let participants = vec![
            participant("mediator", ParticipantRole::Mediator),
            participant("proposer", ParticipantRole::Proposer),
            participant("critic", ParticipantRole::Critic),
        ];
        let order = order_for(DebateStrategy::Adversarial, &participants, 0);
        assert_eq!(order, vec![1, 2, 0]);
    }
}
