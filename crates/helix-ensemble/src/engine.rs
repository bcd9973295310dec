//! Concurrent fan-out over a set of candidate providers (§4.3). Grounded
//! on the `quorum` use case's `JoinSet` + `mpsc::unbounded_channel`
//! idiom for collecting N concurrent branches under a shared deadline,
//! adapted from a 3-phase collection loop into a quorum-gated one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use helix_core::{
    ApiError, CompletionRequest, CompletionResponse, ErrorKind, HelixError, StreamChunk,
};
use helix_registry::health::Outcome;
use helix_registry::{ProviderRef, Registry};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::instrument;

use crate::quality::{quality_score, QualityWeights};
use crate::voting::{self, Ballot, VotingStrategy};

/// Tunables for one `EnsembleEngine` instance (§4.3).
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub strategy: VotingStrategy,
    /// Wall-clock budget for the whole fan-out, shared by every branch.
    pub timeout: Duration,
    /// Minimum number of successful branches required to declare any
    /// winner at all; the request fails if this is not met by deadline.
    pub min_successful_branches: usize,
    /// Per-provider weight used by `Weighted`/`Consensus` fallback.
    /// Providers absent from this map default to `1.0`.
    pub provider_weights: HashMap<String, f32>,
    pub quality_weights: QualityWeights,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Majority,
            timeout: Duration::from_secs(60),
            min_successful_branches: 1,
            provider_weights: HashMap::new(),
            quality_weights: QualityWeights::default(),
        }
    }
}

/// What happened to one branch of the fan-out, independent of whether it
/// ended up winning the vote.
#[derive(Debug, Clone)]
pub enum BranchResult {
    Success { quality_score: f32 },
    Failure(ErrorKind),
    /// The deadline elapsed before this branch's task was ever polled to
    /// completion; distinct from a provider-reported `Timeout` because no
    /// adapter call necessarily happened.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BranchSummary {
    pub provider_id: String,
    pub model_id: String,
    pub result: BranchResult,
    pub latency_ms: u64,
}

/// The result of one `EnsembleEngine::complete` call: the committed
/// winner plus a summary of every branch, for observability and for the
/// Debate Orchestrator's multi-pass validation to inspect disagreement.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub winner: CompletionResponse,
    pub winner_provider_id: String,
    pub branches: Vec<BranchSummary>,
}

/// Fans a `CompletionRequest` out across candidate providers, applies
/// the configured voting strategy, and reports outcomes back to the
/// `Registry` so health/breaker state reflects every branch attempted.
pub struct EnsembleEngine {
    registry: Arc<Registry>,
    config: EnsembleConfig,
}

impl EnsembleEngine {
    pub fn new(registry: Arc<Registry>, config: EnsembleConfig) -> Self {
        Self { registry, config }
    }

    fn weight_for(&self, provider_id: &str) -> f32 {
        self.config
            .provider_weights
            .get(provider_id)
            .copied()
            .unwrap_or(1.0)
    }

    /// Runs one non-streaming ensemble round over `providers`. Waits for
    /// at least the strategy's quorum of branches to complete (§4.3), but
    /// never past `config.timeout`; remaining branches are aborted once
    /// a winner is committed.
    #[instrument(skip(self, request, providers), fields(branch_count = providers.len()))]
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        providers: Vec<ProviderRef>,
    ) -> Result<EnsembleOutcome, HelixError> {
        let total = providers.len();
        if total == 0 {
            return Err(HelixError::Unavailable(
                "no candidate providers available for ensemble fan-out".into(),
            ));
        }

        let quorum = voting::quorum_for(&self.config.strategy, total);
        let deadline = Instant::now() + self.config.timeout;

        let provider_meta: Vec<(String, String)> = providers
            .iter()
            .map(|p| (p.provider_id.clone(), p.model_id.clone()))
            .collect();

        let mut join_set: JoinSet<(ProviderRef, Result<CompletionResponse, HelixError>, u64)> =
            JoinSet::new();
        for provider in providers {
            let request = request.clone();
            join_set.spawn(async move {
                let start = Instant::now();
                let outcome = provider.adapter.complete(&request).await;
                let latency_ms = start.elapsed().as_millis() as u64;
                (provider, outcome, latency_ms)
            });
        }

        let mut ballots: Vec<Ballot> = Vec::new();
        let mut summaries: Vec<BranchSummary> = Vec::new();
        let mut completed = 0usize;

        loop {
            if completed >= total {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((provider, outcome, latency_ms)))) => {
                    completed += 1;
                    match outcome {
                        Ok(response) => {
                            self.registry
                                .record(&provider.provider_id, Outcome::Success, latency_ms);
                            let score =
                                quality_score(request, &response, self.config.quality_weights);
                            summaries.push(BranchSummary {
                                provider_id: provider.provider_id.clone(),
                                model_id: provider.model_id.clone(),
                                result: BranchResult::Success {
                                    quality_score: score,
                                },
                                latency_ms,
                            });
                            ballots.push(Ballot {
                                provider_id: provider.provider_id.clone(),
                                response,
                                quality_score: score,
                                confidence: None,
                                weight: self.weight_for(&provider.provider_id),
                            });
                        }
                        Err(err) => {
                            self.registry.record(
                                &provider.provider_id,
                                Outcome::Failure(err.kind()),
                                latency_ms,
                            );
                            summaries.push(BranchSummary {
                                provider_id: provider.provider_id.clone(),
                                model_id: provider.model_id.clone(),
                                result: BranchResult::Failure(err.kind()),
                                latency_ms,
                            });
                        }
                    }
                }
                // Task panicked; treat as a lost branch and keep going.
                Ok(Some(Err(_join_error))) => {
                    completed += 1;
                }
                // No more tasks left in the set.
                Ok(None) => break,
                // Deadline elapsed.
                Err(_elapsed) => break,
            }

            if completed >= quorum && !ballots.is_empty() {
                break;
            }
        }

        // Commit: abort every branch still in flight. Best-effort; the
        // adapter side is expected to observe cancellation and tear down
        // its connection promptly (§4.3 "cancel within ~100ms").
        join_set.abort_all();
        for (provider_id, model_id) in &provider_meta {
            if !summaries.iter().any(|s| &s.provider_id == provider_id) {
                summaries.push(BranchSummary {
                    provider_id: provider_id.clone(),
                    model_id: model_id.clone(),
                    result: BranchResult::Cancelled,
                    latency_ms: 0,
                });
            }
        }

        if ballots.len() < self.config.min_successful_branches.max(1) {
            return Err(HelixError::Unavailable(format!(
                "only {} of {total} branches succeeded, need at least {}",
                ballots.len(),
                self.config.min_successful_branches.max(1)
            )));
        }

        let winner_idx = voting::decide(&self.config.strategy, &ballots).ok_or_else(|| {
            HelixError::InvariantViolation(
                "voting strategy produced no winner over a non-empty ballot set".into(),
            )
        })?;

        let mut winner = ballots[winner_idx].response.clone();
        winner.quality_score = Some(ballots[winner_idx].quality_score);
        let winner_provider_id = ballots[winner_idx].provider_id.clone();

        Ok(EnsembleOutcome {
            winner,
            winner_provider_id,
            branches: summaries,
        })
    }

    /// Streaming fan-out: the first branch to produce a non-error chunk
    /// is committed to and streamed through verbatim; every other branch
    /// is aborted at that point (§4.3 "first branch to produce a chunk
    /// the policy can commit to is selected").
    #[instrument(skip(self, request, providers), fields(branch_count = providers.len()))]
    pub async fn stream(
        &self,
        request: &CompletionRequest,
        providers: Vec<ProviderRef>,
    ) -> Result<BoxStream<'static, StreamChunk>, HelixError> {
        if providers.is_empty() {
            return Err(HelixError::Unavailable(
                "no candidate providers available for ensemble fan-out".into(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel::<(usize, StreamChunk)>();
        let mut handles = Vec::with_capacity(providers.len());

        for (idx, provider) in providers.into_iter().enumerate() {
            let tx = tx.clone();
            let request = request.clone();
            let registry = Arc::clone(&self.registry);
            let handle = tokio::spawn(async move {
                let start = Instant::now();
                match provider.adapter.stream(&request).await {
                    Ok(mut upstream) => {
                        while let Some(chunk) = upstream.next().await {
                            if tx.send((idx, chunk)).is_err() {
                                break;
                            }
                        }
                        registry.record(
                            &provider.provider_id,
                            Outcome::Success,
                            start.elapsed().as_millis() as u64,
                        );
                    }
                    Err(err) => {
                        registry.record(
                            &provider.provider_id,
                            Outcome::Failure(err.kind()),
                            start.elapsed().as_millis() as u64,
                        );
                        let _ = tx.send((
                            idx,
                            StreamChunk::terminal_error(
                                format!("branch-{idx}"),
                                0,
                                ApiError::from(&err).with_provider(provider.provider_id.clone()),
                            ),
                        ));
                    }
                }
            });
            handles.push(handle);
        }
        drop(tx);

        struct State {
            rx: mpsc::UnboundedReceiver<(usize, StreamChunk)>,
            handles: Vec<tokio::task::JoinHandle<()>>,
            winner: Option<usize>,
        }

        let state = State {
            rx,
            handles,
            winner: None,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                let (idx, chunk) = match state.rx.recv().await {
                    Some(item) => item,
                    None => return None,
                };
                match state.winner {
                    None => {
                        if chunk.error.is_some() {
                            // This branch failed before producing usable
                            // content; keep waiting for another branch.
                            continue;
                        }
                        state.winner = Some(idx);
                        for (i, handle) in state.handles.iter().enumerate() {
                            if i != idx {
                                handle.abort();
                            }
                        }
                        return Some((chunk, state));
                    }
                    Some(winner) if winner == idx => return Some((chunk, state)),
                    Some(_) => continue,
                }
            }
        });

        Ok(stream.boxed())
    }
}
