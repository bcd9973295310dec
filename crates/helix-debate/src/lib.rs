//! The Debate Orchestrator (§4.4): multi-round, multi-participant
//! discussion over a shared `Registry`, with per-participant provider
//! fallback chains, token-Jaccard consensus scoring, and optional
//! multi-pass validation. Grounded on the `quorum` use case's
//! per-branch timeout/partial-failure collection loop and on
//! `querymt::chain::multi::MultiPromptChain`'s ordered fallback chain.

pub mod consensus;
pub mod orchestrator;
pub mod schedule;
pub mod transcript;

pub use consensus::{agreement_matrix, synthesize};
pub use orchestrator::DebateOrchestrator;
pub use transcript::TranscriptEvent;
