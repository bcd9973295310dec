use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::message::ToolCall;

/// A named role a debate participant plays, or a free-form label for
/// configurations that don't use the fixed roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Analyst,
    Proposer,
    Critic,
    Synthesizer,
    Mediator,
    Custom(String),
}

/// Lifecycle state of a participant within a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Idle,
    Thinking,
    Contributed,
    Skipped,
    Failed,
}

/// One entry in a participant's provider fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModelRef {
    pub provider_id: String,
    pub model_id: String,
}

/// A role-specialized debate participant, backed by its own ordered
/// provider fallback chain (§4.4 "Per-participant fan-out").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub role: ParticipantRole,
    pub weight: f32,
    pub priority: u32,
    pub style: Option<String>,
    pub llm_chain: Vec<ProviderModelRef>,
    pub state: ParticipantState,
}

impl Participant {
    pub fn new(id: impl Into<String>, role: ParticipantRole, llm_chain: Vec<ProviderModelRef>) -> Self {
        Self {
            id: id.into(),
            role,
            weight: 1.0,
            priority: 0,
            style: None,
            llm_chain,
            state: ParticipantState::Idle,
        }
    }
}

/// A single participant's output within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub participant_id: String,
    pub content: String,
    pub tokens: u32,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// One round of a debate: the contributions gathered, and the agreement
/// matrix/consensus score computed over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    pub contributions: Vec<Contribution>,
    /// Row-major NxN agreement scores, `agreement_matrix[i][j] ∈ [0,1]`,
    /// symmetric with a diagonal of 1.0.
    pub agreement_matrix: Vec<Vec<f32>>,
    pub consensus_score: f32,
}

/// Participant scheduling strategy for a debate (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStrategy {
    RoundRobin,
    FreeForm,
    Structured,
    Adversarial,
    Collaborative,
}

/// Sub-phase of the optional multi-pass validation flow (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    Initial,
    Validate,
    Polish,
    Finalize,
}

/// Request-scoped debate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    pub strategy: DebateStrategy,
    pub max_rounds: u32,
    pub consensus_threshold: f32,
    #[serde(with = "duration_millis")]
    pub per_round_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub per_participant_timeout: Duration,
    pub enable_multi_pass_validation: bool,
    pub min_confidence_to_skip: f32,
    pub max_validation_rounds: u32,
    /// External enhancement hook; HelixAgent's core never implements the
    /// enhancement itself (out of scope per §1), it only threads the
    /// toggle through to whichever collaborator consults it.
    pub cognee_enabled: bool,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            strategy: DebateStrategy::Structured,
            max_rounds: 5,
            consensus_threshold: 0.75,
            per_round_timeout: Duration::from_secs(30),
            per_participant_timeout: Duration::from_secs(15),
            enable_multi_pass_validation: false,
            min_confidence_to_skip: 0.9,
            max_validation_rounds: 2,
            cognee_enabled: false,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Overall debate session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Converged,
    Exhausted,
    Aborted,
}

/// A bounded, round-based multi-agent discussion and its outcome.
/// Created per request, mutated only by the Debate Orchestrator, never
/// shared between concurrent requests (§3 Lifecycles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: Uuid,
    pub topic: String,
    pub participants: Vec<Participant>,
    pub config: DebateConfig,
    pub transcript: Vec<Round>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl DebateSession {
    pub fn new(topic: impl Into<String>, participants: Vec<Participant>, config: DebateConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            participants,
            config,
            transcript: Vec::new(),
            consensus: None,
            state: SessionState::Pending,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Invariant (c): round indices are contiguous starting at 0.
    pub fn has_contiguous_rounds(&self) -> bool {
        self.transcript
            .iter()
            .enumerate()
            .all(|(i, round)| round.index as usize == i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_no_rounds_and_is_pending() {
        let session = DebateSession::new("topic", vec![], DebateConfig::default());
        assert_eq!(session.state, SessionState::Pending);
        assert!(session.has_contiguous_rounds());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = DebateConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DebateConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_rounds, config.max_rounds);
        assert_eq!(back.per_round_timeout, config.per_round_timeout);
    }
}
