//! Live transcript events emitted during a debate session (§4.4). These
//! are distinct from `helix_core::collab::TranscriptStore`, which
//! persists the finished `DebateSession` after the fact; this is the
//! granular, in-flight event stream a host can subscribe to for live
//! observability, mirroring the Registry's own `subscribe` pattern.

use helix_core::{DebateStrategy, ValidationPhase};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    RoundStarted {
        session_id: Uuid,
        round_index: u32,
        strategy: DebateStrategy,
        validation_phase: Option<ValidationPhase>,
    },
    ParticipantStarted {
        session_id: Uuid,
        round_index: u32,
        participant_id: String,
    },
    ParticipantDelta {
        session_id: Uuid,
        round_index: u32,
        participant_id: String,
        content: String,
    },
    ParticipantEnded {
        session_id: Uuid,
        round_index: u32,
        participant_id: String,
        succeeded: bool,
    },
    RoundEnded {
        session_id: Uuid,
        round_index: u32,
        consensus_score: f32,
    },
    SessionEnded {
        session_id: Uuid,
        converged: bool,
    },
}

pub(crate) type TranscriptCallback = Box<dyn Fn(&TranscriptEvent) + Send + Sync>;
