//! Shared data model, error taxonomy, and the provider adapter contract
//! consumed by every crate in the HelixAgent workspace.

pub mod adapter;
pub mod capabilities;
pub mod collab;
pub mod credential;
pub mod debate;
pub mod error;
pub mod health;
pub mod message;
pub mod request;
pub mod response;
pub mod verified;

pub use adapter::{with_retry, ModelId, ProviderAdapter, RetryPolicy, HEALTH_PROBE_TIMEOUT};
pub use capabilities::{Capabilities, Modality};
pub use credential::Credential;
pub use debate::{
    Contribution, DebateConfig, DebateSession, DebateStrategy, Participant, ParticipantRole,
    ParticipantState, ProviderModelRef, Round, SessionState, ValidationPhase,
};
pub use error::{ApiError, ErrorKind, HelixError, Result};
pub use health::{CircuitState, HealthState, HealthWindow};
pub use message::{
    ChatMessage, ChatRole, FunctionCall, FunctionTool, ParameterProperty, ParametersSchema,
    StructuredOutputFormat, Tool, ToolCall, ToolChoice,
};
pub use request::{CompletionRequest, SamplingParams};
pub use response::{Choice, CompletionResponse, Delta, FinishReason, StreamChunk, Usage};
pub use verified::{ModelSource, Score, Verification, VerifiedModel};
