//! API interaction layer: the completion seam, retry, and model lookup.
//!
//! - [`completion`] — the [`Completion`] trait every model backend implements,
//!   and the [`Completer`] wrapper that applies retry and default model
//!   settings to each call.
//! - [`retry`] — error classification (429, 5xx, network timeouts) with
//!   configurable exponential backoff and jitter. Never retries auth errors.
//! - [`models`] — [`ModelCatalog`] for context-window lookup.

pub mod completion;
pub mod models;
pub mod retry;

// Re-export commonly used items at the module level.
pub use completion::{Completer, Completion, CompletionFuture, CompletionRequest, FnCompletion};
pub use models::{ModelCatalog, StaticModelCatalog};
pub use retry::RetryConfig;
