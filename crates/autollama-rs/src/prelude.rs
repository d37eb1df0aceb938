//! Convenience re-exports for common `autollama-rs` types.
//!
//! Meant to be glob-imported when building agents:
//!
//! ```ignore
//! use autollama_rs::prelude::*;
//! ```
//!
//! This pulls in what most agent programs need: the [`OpenRouterClient`],
//! [`Message`] constructors, [`Agent`] + [`AgentConfig`], the completion seam
//! and the context components. Retry internals and the reply validator are
//! left out; import those from their modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Error, Message, MessageKind, MessageRole, OpenRouterClient, Result};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{Agent, AssistantReply};
pub use crate::config::{AgentConfig, FileConfig};

// ── Completion seam ─────────────────────────────────────────────────
pub use crate::api::{
    Completer, Completion, CompletionRequest, FnCompletion, ModelCatalog, RetryConfig,
    StaticModelCatalog,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    ChunkedSummarizer, ContextAssembler, MessageHistory, TextSplitter, TokenCounter,
    count_message_tokens, count_string_tokens,
};

// ── Memory ──────────────────────────────────────────────────────────
pub use crate::memory::{InMemoryStore, MemoryStore};
