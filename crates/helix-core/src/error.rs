use thiserror::Error;

/// The closed set of error kinds an adapter, the registry, or an
/// orchestrator may surface. New variants are a breaking change: callers
/// match exhaustively on this enum to decide retry/quarantine behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level connection failure (DNS, TCP reset, TLS handshake).
    ConnectionFailed,
    /// The call did not complete within its deadline.
    Timeout,
    /// Credentials were rejected or missing.
    AuthFailed,
    /// The provider rejected the request as over its rate limit.
    RateLimited,
    /// The provider is shedding load (e.g. HTTP 503).
    Overloaded,
    /// The provider is known to be down (health probe / registry signal).
    Unavailable,
    /// The provider refused to answer on content-policy grounds.
    ContentFiltered,
    /// The request itself was malformed or unsupported by the vendor.
    BadRequest,
    /// The vendor responded with a 5xx / generic provider-side failure.
    InternalProviderError,
    /// The response body could not be parsed into the uniform contract.
    MalformedResponse,
    /// A configuration value was invalid at adapter construction.
    ConfigError,
    /// A core invariant was violated; indicates a bug, not a vendor fault.
    InvariantViolation,
}

impl ErrorKind {
    /// Whether a caller may usefully retry the request as-is. Mirrors
    /// §7 of the specification this taxonomy is drawn from.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::Timeout
                | ErrorKind::ConnectionFailed
                | ErrorKind::Overloaded
                | ErrorKind::Unavailable
        )
    }

    /// Whether an adapter is permitted to retry this kind internally,
    /// distinct from whether the *caller* should retry (`is_retryable`).
    /// Only connection failures and internal provider errors qualify;
    /// `RateLimited` is surfaced up untouched so a caller can honor
    /// `Retry-After` at the right layer.
    pub fn is_adapter_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed | ErrorKind::InternalProviderError
        )
    }
}

/// A structured, user-visible error object: `{kind, message, provider_id?,
/// retryable}`. This is what a caller ultimately receives; `HelixError`
/// below is the richer internal error type adapters and components
/// propagate with `?`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider_id: Option<String>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.is_retryable();
        Self {
            kind,
            message: message.into(),
            provider_id: None,
            retryable,
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

impl From<&HelixError> for ApiError {
    fn from(err: &HelixError) -> Self {
        ApiError::new(err.kind(), err.to_string())
    }
}

/// The error type threaded through every fallible boundary in this
/// workspace. Carries a closed `ErrorKind` plus enough context to log or
/// retry, and `#[from]`-converts the handful of third-party error types
/// adapters actually hit.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("content filtered: {0}")]
    ContentFiltered(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal provider error: {0}")]
    InternalProviderError(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("http transport error: {0}")]
    Http(#[from] http::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl HelixError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HelixError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            HelixError::Timeout => ErrorKind::Timeout,
            HelixError::AuthFailed(_) => ErrorKind::AuthFailed,
            HelixError::RateLimited { .. } => ErrorKind::RateLimited,
            HelixError::Overloaded(_) => ErrorKind::Overloaded,
            HelixError::Unavailable(_) => ErrorKind::Unavailable,
            HelixError::ContentFiltered(_) => ErrorKind::ContentFiltered,
            HelixError::BadRequest(_) => ErrorKind::BadRequest,
            HelixError::InternalProviderError(_) => ErrorKind::InternalProviderError,
            HelixError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            HelixError::ConfigError(_) => ErrorKind::ConfigError,
            HelixError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            // Transport-shaped third-party errors map onto the closed set
            // at the nearest matching kind rather than leaking their type.
            HelixError::Http(_) => ErrorKind::ConnectionFailed,
            HelixError::Json(_) => ErrorKind::MalformedResponse,
            HelixError::UrlParse(_) => ErrorKind::ConfigError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, HelixError>;
