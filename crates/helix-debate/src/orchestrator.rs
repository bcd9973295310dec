//! The Debate Orchestrator (§4.4): drives a `DebateSession` through
//! scheduled rounds of participant contributions, each participant
//! falling back across its own ordered provider chain, until consensus
//! is reached, rounds are exhausted, or the session is aborted.
//! Grounded on the `quorum` use case's per-branch timeout/partial-
//! failure handling, generalized from one fixed round into a
//! multi-round loop, and on `MultiPromptChain`'s ordered
//! provider/model fallback for each participant's own chain.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use helix_core::{
    ApiError, ChatMessage, ChatRole, Contribution, DebateSession, ErrorKind, HelixError,
    ParticipantRole, ParticipantState, ProviderModelRef, Round, SessionState, ToolCall,
    ValidationPhase,
};
use helix_registry::health::Outcome;
use helix_registry::{Registry, SelectionCriteria};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::consensus;
use crate::schedule;
use crate::transcript::{TranscriptCallback, TranscriptEvent};

fn helix_error_from_api(err: &ApiError) -> HelixError {
    match err.kind {
        ErrorKind::ConnectionFailed => HelixError::ConnectionFailed(err.message.clone()),
        ErrorKind::Timeout => HelixError::Timeout,
        ErrorKind::AuthFailed => HelixError::AuthFailed(err.message.clone()),
        ErrorKind::RateLimited => HelixError::RateLimited { retry_after_ms: None },
        ErrorKind::Overloaded => HelixError::Overloaded(err.message.clone()),
        ErrorKind::Unavailable => HelixError::Unavailable(err.message.clone()),
        ErrorKind::ContentFiltered => HelixError::ContentFiltered(err.message.clone()),
        ErrorKind::BadRequest => HelixError::BadRequest(err.message.clone()),
        ErrorKind::InternalProviderError => HelixError::InternalProviderError(err.message.clone()),
        ErrorKind::MalformedResponse => HelixError::MalformedResponse(err.message.clone()),
        ErrorKind::ConfigError => HelixError::ConfigError(err.message.clone()),
        ErrorKind::InvariantViolation => HelixError::InvariantViolation(err.message.clone()),
    }
}

fn build_messages(
    topic: &str,
    prior_rounds: &[Round],
    this_round_so_far: &[Contribution],
    participant_id: &str,
    role: &ParticipantRole,
    style: Option<&str>,
) -> Vec<ChatMessage> {
    let mut system = format!(
        "You are participant \"{participant_id}\" playing the role of {role:?} in a structured multi-agent debate on the following topic."
    );
    if let Some(style) = style {
        system.push_str(&format!(" Adopt this style: {style}."));
    }
    let mut messages = vec![ChatMessage::system(system), ChatMessage::user(topic)];

    for round in prior_rounds {
        for contribution in &round.contributions {
            messages.push(transcript_message(contribution));
        }
    }
    for contribution in this_round_so_far {
        messages.push(transcript_message(contribution));
    }
    messages
}

fn transcript_message(contribution: &Contribution) -> ChatMessage {
    ChatMessage {
        role: ChatRole::Assistant,
        content: format!("[{}] {}", contribution.participant_id, contribution.content),
        name: Some(contribution.participant_id.clone()),
        tool_calls: None,
        tool_call_id: None,
    }
}

/// Drives `DebateSession`s to completion against a shared `Registry`.
/// One instance may run many sessions; sessions themselves are never
/// shared across concurrent `run` calls (§3 Lifecycles).
pub struct DebateOrchestrator {
    registry: Arc<Registry>,
    subscribers: RwLock<Vec<TranscriptCallback>>,
}

impl DebateOrchestrator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&TranscriptEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Box::new(callback));
    }

    fn emit(&self, event: TranscriptEvent) {
        for callback in self.subscribers.read().iter() {
            callback(&event);
        }
    }

    /// Marks an in-progress session `Aborted`, for a host that needs to
    /// cancel a debate out-of-band (e.g. the user disconnected).
    pub fn mark_aborted(session: &mut DebateSession) {
        session.state = SessionState::Aborted;
        session.ended_at = Some(Utc::now());
    }

    /// Runs `session` from `Pending` through to a terminal state
    /// (`Converged`, `Exhausted`, or `Aborted`), including any
    /// multi-pass validation the configuration calls for.
    #[instrument(skip(self, session), fields(session_id = %session.id, topic = %session.topic))]
    pub async fn run(&self, mut session: DebateSession) -> Result<DebateSession, HelixError> {
        if session.participants.is_empty() {
            Self::mark_aborted(&mut session);
            self.emit(TranscriptEvent::SessionEnded {
                session_id: session.id,
                converged: false,
            });
            return Ok(session);
        }

        session.state = SessionState::Running;
        let quorum = session.participants.len().div_ceil(2);

        for round_index in 0..session.config.max_rounds {
            let round = self
                .run_round(&mut session, round_index, session.config.per_round_timeout, None)
                .await;

            // Fewer than ceil(N/2) contributions means the round itself
            // failed (spec.md:144/227); the session aborts rather than
            // limping to `Exhausted` on a round with no real content.
            if round.contributions.len() < quorum {
                session.transcript.push(round);
                Self::mark_aborted(&mut session);
                self.emit(TranscriptEvent::SessionEnded {
                    session_id: session.id,
                    converged: false,
                });
                return Ok(session);
            }

            let consensus_score = round.consensus_score;
            let candidate = consensus::synthesize(&round.contributions, &round.agreement_matrix);
            session.transcript.push(round);

            self.emit(TranscriptEvent::RoundEnded {
                session_id: session.id,
                round_index,
                consensus_score,
            });

            if consensus_score >= session.config.consensus_threshold {
                session.consensus = candidate;
                session.state = SessionState::Converged;
                break;
            }
        }

        if session.state == SessionState::Running {
            session.state = SessionState::Exhausted;
            if let Some(last) = session.transcript.last() {
                session.consensus = consensus::synthesize(&last.contributions, &last.agreement_matrix);
            }
        }

        if session.config.enable_multi_pass_validation {
            self.run_validation_passes(&mut session).await;
        }

        session.ended_at = Some(Utc::now());
        self.emit(TranscriptEvent::SessionEnded {
            session_id: session.id,
            converged: session.state == SessionState::Converged,
        });

        Ok(session)
    }

    async fn run_validation_passes(&self, session: &mut DebateSession) {
        if session.consensus.is_none() {
            return;
        }
        const PHASES: [ValidationPhase; 3] = [
            ValidationPhase::Validate,
            ValidationPhase::Polish,
            ValidationPhase::Finalize,
        ];
        let mut round_index = session
            .transcript
            .last()
            .map(|r| r.index + 1)
            .unwrap_or(0);

        for phase in PHASES.iter().take(session.config.max_validation_rounds as usize) {
            let last_score = session.transcript.last().map(|r| r.consensus_score).unwrap_or(0.0);
            if last_score >= session.config.min_confidence_to_skip {
                break;
            }
            let round = self
                .run_round(session, round_index, session.config.per_round_timeout, Some(*phase))
                .await;
            let consensus_score = round.consensus_score;
            if let Some(text) = consensus::synthesize(&round.contributions, &round.agreement_matrix) {
                session.consensus = Some(text);
            }
            session.transcript.push(round);
            self.emit(TranscriptEvent::RoundEnded {
                session_id: session.id,
                round_index,
                consensus_score,
            });
            round_index += 1;
            if consensus_score >= session.config.min_confidence_to_skip {
                break;
            }
        }
    }

    async fn run_round(
        &self,
        session: &mut DebateSession,
        round_index: u32,
        round_timeout: Duration,
        phase: Option<ValidationPhase>,
    ) -> Round {
        self.emit(TranscriptEvent::RoundStarted {
            session_id: session.id,
            round_index,
            strategy: session.config.strategy,
            validation_phase: phase,
        });

        let order = schedule::order_for(session.config.strategy, &session.participants, round_index);
        let deadline = Instant::now() + round_timeout;
        let per_participant_timeout = session.config.per_participant_timeout;
        let mut contributions: Vec<Contribution> = Vec::new();

        if schedule::is_sequential(session.config.strategy) {
            for idx in order {
                if Instant::now() >= deadline {
                    break;
                }
                let (participant_id, role, style, chain) = {
                    let p = &session.participants[idx];
                    (p.id.clone(), p.role.clone(), p.style.clone(), p.llm_chain.clone())
                };
                self.emit(TranscriptEvent::ParticipantStarted {
                    session_id: session.id,
                    round_index,
                    participant_id: participant_id.clone(),
                });
                let messages = build_messages(
                    &session.topic,
                    &session.transcript,
                    &contributions,
                    &participant_id,
                    &role,
                    style.as_deref(),
                );
                let budget = deadline
                    .saturating_duration_since(Instant::now())
                    .min(per_participant_timeout);
                let result = self
                    .run_participant(chain, messages, session.id, round_index, participant_id.clone(), budget)
                    .await;
                match result {
                    Ok(contribution) => {
                        session.participants[idx].state = ParticipantState::Contributed;
                        self.emit(TranscriptEvent::ParticipantEnded {
                            session_id: session.id,
                            round_index,
                            participant_id,
                            succeeded: true,
                        });
                        contributions.push(contribution);
                    }
                    Err(_err) => {
                        session.participants[idx].state = ParticipantState::Failed;
                        self.emit(TranscriptEvent::ParticipantEnded {
                            session_id: session.id,
                            round_index,
                            participant_id,
                            succeeded: false,
                        });
                    }
                }
            }
        } else {
            let topic = session.topic.clone();
            let transcript_snapshot = session.transcript.clone();
            let session_id = session.id;

            for idx in &order {
                let participant_id = session.participants[*idx].id.clone();
                self.emit(TranscriptEvent::ParticipantStarted {
                    session_id,
                    round_index,
                    participant_id,
                });
            }

            let futures = order.iter().map(|&idx| {
                let p = &session.participants[idx];
                let messages = build_messages(&topic, &transcript_snapshot, &[], &p.id, &p.role, p.style.as_deref());
                let budget = deadline
                    .saturating_duration_since(Instant::now())
                    .min(per_participant_timeout);
                let chain = p.llm_chain.clone();
                let participant_id = p.id.clone();
                async move {
                    let result = self
                        .run_participant(chain, messages, session_id, round_index, participant_id.clone(), budget)
                        .await;
                    (idx, participant_id, result)
                }
            });

            for (idx, participant_id, result) in join_all(futures).await {
                match result {
                    Ok(contribution) => {
                        session.participants[idx].state = ParticipantState::Contributed;
                        self.emit(TranscriptEvent::ParticipantEnded {
                            session_id: session.id,
                            round_index,
                            participant_id,
                            succeeded: true,
                        });
                        contributions.push(contribution);
                    }
                    Err(_err) => {
                        session.participants[idx].state = ParticipantState::Failed;
                        self.emit(TranscriptEvent::ParticipantEnded {
                            session_id: session.id,
                            round_index,
                            participant_id,
                            succeeded: false,
                        });
                    }
                }
            }
        }

        let (agreement_matrix, consensus_score) = consensus::agreement_matrix(&contributions);
        Round {
            index: round_index,
            contributions,
            agreement_matrix,
            consensus_score,
        }
    }

    /// Invokes one participant's fallback chain in order, skipping to the
    /// next link on any failure except `ContentFiltered`/`BadRequest`,
    /// which are terminal for this contribution (§4.4).
    async fn run_participant(
        &self,
        chain: Vec<ProviderModelRef>,
        messages: Vec<ChatMessage>,
        session_id: Uuid,
        round_index: u32,
        participant_id: String,
        budget: Duration,
    ) -> Result<Contribution, HelixError> {
        let deadline = Instant::now() + budget;
        let mut last_err: Option<HelixError> = None;

        for link in &chain {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let criteria = SelectionCriteria {
                provider_id: Some(link.provider_id.clone()),
                model_id: Some(link.model_id.clone()),
                requires_streaming: true,
                ..Default::default()
            };
            let Some(provider_ref) = self.registry.select(&criteria).into_iter().next() else {
                last_err = Some(HelixError::Unavailable(format!(
                    "{}/{} is not currently selectable",
                    link.provider_id, link.model_id
                )));
                continue;
            };

            let request = helix_core::CompletionRequest {
                messages: messages.clone(),
                tools: None,
                tool_choice: None,
                sampling: helix_core::SamplingParams::default(),
                stream: true,
            };

            let start = Instant::now();
            let stream_result = tokio::time::timeout(remaining, provider_ref.adapter.stream(&request)).await;
            let opened = match stream_result {
                Ok(inner) => inner,
                Err(_elapsed) => {
                    self.registry.record(&link.provider_id, Outcome::Failure(ErrorKind::Timeout), start.elapsed().as_millis() as u64);
                    last_err = Some(HelixError::Timeout);
                    continue;
                }
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    self.registry.record(&link.provider_id, Outcome::Failure(err.kind()), start.elapsed().as_millis() as u64);
                    let terminal = matches!(err, HelixError::ContentFiltered(_) | HelixError::BadRequest(_));
                    if terminal {
                        return Err(err);
                    }
                    last_err = Some(err);
                    continue;
                }
            };

            let mut content = String::new();
            let mut tool_calls: Option<Vec<ToolCall>> = None;
            let mut failure: Option<HelixError> = None;

            while let Some(chunk) = stream.next().await {
                if let Some(delta_content) = &chunk.delta.content {
                    if !delta_content.is_empty() {
                        content.push_str(delta_content);
                        self.emit(TranscriptEvent::ParticipantDelta {
                            session_id,
                            round_index,
                            participant_id: participant_id.clone(),
                            content: delta_content.clone(),
                        });
                    }
                }
                if let Some(calls) = &chunk.delta.tool_calls {
                    tool_calls.get_or_insert_with(Vec::new).extend(calls.clone());
                }
                if let Some(api_error) = &chunk.error {
                    failure = Some(helix_error_from_api(api_error));
                }
                if chunk.is_terminal() {
                    break;
                }
                if Instant::now() >= deadline {
                    failure = Some(HelixError::Timeout);
                    break;
                }
            }

            let latency_ms = start.elapsed().as_millis() as u64;

            if let Some(err) = failure {
                self.registry.record(&link.provider_id, Outcome::Failure(err.kind()), latency_ms);
                let terminal = matches!(err, HelixError::ContentFiltered(_) | HelixError::BadRequest(_));
                if terminal {
                    return Err(err);
                }
                last_err = Some(err);
                continue;
            }

            self.registry.record(&link.provider_id, Outcome::Success, latency_ms);
            let tokens = content.split_whitespace().count() as u32;
            return Ok(Contribution {
                participant_id,
                content,
                tokens,
                latency_ms,
                tool_calls,
                score: None,
            });
        }

        Err(last_err.unwrap_or_else(|| {
            HelixError::Unavailable(format!("participant {participant_id} exhausted its provider chain"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_core::{DebateConfig, DebateSession, DebateStrategy, Participant, ParticipantRole};

    fn unreachable_chain() -> Vec<ProviderModelRef> {
        vec![ProviderModelRef {
            provider_id: "nowhere".to_string(),
            model_id: "nowhere-model".to_string(),
        }]
    }

    #[tokio::test]
    async fn round_with_no_contributions_aborts_instead_of_exhausting() {
        let orchestrator = DebateOrchestrator::new(Arc::new(Registry::new()));
        let participants = vec![
            Participant::new("analyst", ParticipantRole::Analyst, unreachable_chain()),
            Participant::new("critic", ParticipantRole::Critic, unreachable_chain()),
        ];
        let mut config = DebateConfig::default();
        config.strategy = DebateStrategy::Collaborative;
        config.max_rounds = 3;
        config.per_round_timeout = Duration::from_millis(200);
        config.per_participant_timeout = Duration::from_millis(100);

        let session = DebateSession::new("should every team ship canaries?", participants, config);
        let finished = orchestrator.run(session).await.unwrap();

        assert_eq!(finished.state, SessionState::Aborted);
        assert_eq!(finished.transcript.len(), 1);
        assert!(finished.transcript[0].contributions.is_empty());
    }
}
