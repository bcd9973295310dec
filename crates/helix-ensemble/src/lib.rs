//! The Ensemble Engine (§4.3): concurrent fan-out of one request across
//! several verified providers, followed by a configurable voting
//! strategy and post-hoc quality scoring. Grounded on the synapse
//! gateway's router fan-out/cascade shape and the `quorum` use case's
//! `JoinSet`-based concurrent collection idiom, generalized from a fixed
//! 3-phase pipeline into a quorum-gated N-branch vote.

pub mod engine;
pub mod quality;
pub mod voting;

pub use engine::{BranchResult, BranchSummary, EnsembleConfig, EnsembleEngine, EnsembleOutcome};
pub use quality::{quality_score, normalize_for_vote, QualityWeights};
pub use voting::{Ballot, VotingStrategy};
