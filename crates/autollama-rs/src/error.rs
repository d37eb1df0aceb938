//! Error types for the agent core.
//!
//! [`CompletionError`] describes what went wrong at the completion seam (one
//! HTTP call, one stub invocation). [`Error`] is what the core surfaces to
//! callers once local recovery (retry) has been exhausted or skipped.

use thiserror::Error;

/// The coarse category of a [`CompletionError`].
///
/// [`RetryConfig`](crate::api::retry::RetryConfig) lists the kinds it is
/// allowed to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionErrorKind {
    RateLimited,
    Gateway,
    Authentication,
    Configuration,
    InvalidResponse,
}

/// Failure of a single completion call.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// HTTP 429 or an equivalent provider throttle.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 5xx responses, timeouts, connection resets.
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The request itself is wrong (unknown model, bad parameters).
    #[error("invalid request configuration: {0}")]
    Configuration(String),

    /// The provider answered but the body could not be used.
    #[error("malformed completion response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    pub fn kind(&self) -> CompletionErrorKind {
        match self {
            CompletionError::RateLimited(_) => CompletionErrorKind::RateLimited,
            CompletionError::Gateway(_) => CompletionErrorKind::Gateway,
            CompletionError::Authentication(_) => CompletionErrorKind::Authentication,
            CompletionError::Configuration(_) => CompletionErrorKind::Configuration,
            CompletionError::InvalidResponse(_) => CompletionErrorKind::InvalidResponse,
        }
    }
}

/// Top-level error for summarization, folding and context assembly.
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing to summarize.
    #[error("no text to summarize")]
    EmptyInput,

    /// `instruction` and `question` are mutually exclusive.
    #[error("'instruction' and 'question' cannot both be set")]
    ConflictingInstruction,

    /// Chunk summaries stopped shrinking.
    #[error("summary still exceeds its budget after {max_depth} chunking passes")]
    SummarizationDepthExceeded { max_depth: usize },

    /// A retryable completion failure that persisted past the retry cap.
    #[error("completion failed after {attempts} attempt(s): {source}")]
    TransientCompletion {
        attempts: u32,
        #[source]
        source: CompletionError,
    },

    /// A completion failure that is never retried.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// Limits or settings make the request impossible to build.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
