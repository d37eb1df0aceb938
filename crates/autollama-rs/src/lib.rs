//! Autonomous LLM agent loop with token-budgeted context assembly.
//!
//! `autollama-rs` keeps a long-running agent conversation inside a model's
//! fixed context window. Every turn, the most recent history messages that
//! fit are sent verbatim; everything older is folded into a running summary
//! by the model itself. Documents too large for one request are split into
//! balanced, sentence-aligned chunks, summarized chunk by chunk, and the
//! concatenated chunk summaries are summarized again until they fit.
//!
//! # Getting started
//!
//! ```ignore
//! use autollama_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> autollama_rs::Result<()> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let client = OpenRouterClient::new(api_key)?;
//!     let config = AgentConfig::new("meta-llama/llama-3-8b-instruct");
//!
//!     let mut agent = Agent::new(config, Arc::new(client))?
//!         .with_system_prompt("You are a diligent research agent.");
//!
//!     let reply = agent.step("Determine which next command to use.").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Count tokens:** [`TokenCounter`](context::tokens::TokenCounter) and the
//!   default [`HeuristicCounter`](context::tokens::HeuristicCounter).
//! - **Split long text:** [`TextSplitter`](context::splitter::TextSplitter).
//! - **Summarize long text:** [`ChunkedSummarizer`](context::summarizer::ChunkedSummarizer).
//! - **Keep conversation state:** [`MessageHistory`](context::history::MessageHistory).
//! - **Build the per-turn prompt:** [`ContextAssembler`](context::assembler::ContextAssembler).
//! - **Call a model:** the [`Completion`](api::completion::Completion) trait,
//!   wrapped by [`Completer`](api::completion::Completer) which applies the
//!   [`RetryConfig`](api::retry::RetryConfig) policy.
//! - **Run turns:** [`Agent`](agent::Agent).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimation, text splitting, chunked summarization, message history, context assembly |
//! | [`api`] | Completion seam, retry with backoff, model catalog |
//! | [`agent`] | Turn loop and the structured reply schema |
//! | [`config`] | [`AgentConfig`](config::AgentConfig) and JSON file overrides |
//! | [`memory`] | Append/query text store for chunk summaries |

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod prelude;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub use error::{CompletionError, CompletionErrorKind, Error, Result};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3-8b-instruct";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Local tag describing what a history message represents.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A structured reply produced by the model.
    AiResponse,
    /// The outcome of executing the command a reply asked for.
    ActionResult,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::AiResponse => write!(f, "ai_response"),
            MessageKind::ActionResult => write!(f, "action_result"),
        }
    }
}

/// A message in the conversation.
///
/// `kind` never goes over the wire; it only matters to
/// [`MessageHistory`](context::history::MessageHistory).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip)]
    pub kind: Option<MessageKind>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            kind: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Tag the message with a [`MessageKind`].
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Attach a participant name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// JSON output format type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_object")]
    JsonObject,
}

/// JSON output mode.
#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`OpenRouterClient::chat()`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Implements [`Completion`](api::completion::Completion), so it can be handed
/// to an [`Agent`](agent::Agent) or wrapped in a
/// [`Completer`](api::completion::Completer) directly.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) referer: String,
    pub(crate) title: String,
    pub(crate) json_mode: bool,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_headers(
            api_key,
            "https://github.com/autollama/autollama-rs",
            "autollama-rs",
        )
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("autollama-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            json_mode: false,
        })
    }

    /// Ask the provider for JSON-object output on every request.
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    /// Send a chat completion request.
    pub async fn chat(
        &self,
        body: &ChatRequest,
    ) -> std::result::Result<ChatCompletion, CompletionError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={:?}, temp={:?}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| api::retry::classify_failure(None, &format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CompletionError::Gateway(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(api::retry::classify_failure(
                Some(status.as_u16()),
                &format!("OpenRouter API HTTP {status}: {text}"),
            ));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(api::retry::classify_failure(
                None,
                &format!("OpenRouter API error: {}", err.message),
            ));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            },
            None => ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");
        assert!(sys.kind.is_none());

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let reply = Message::assistant("{}").with_kind(MessageKind::AiResponse);
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(reply.kind, Some(MessageKind::AiResponse));
    }

    #[test]
    fn kind_is_not_serialized() {
        let msg = Message::system("Command ls returned: a b").with_kind(MessageKind::ActionResult);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert!(json.get("kind").is_none());
        assert!(json.get("name").is_none());
    }

    #[test]
    fn chat_request_skips_unset_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::user("hi")],
            max_tokens: Some(100),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("temperature").is_none());
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn zero_temperature_is_sent() {
        let req = ChatRequest {
            model: "m".into(),
            temperature: Some(0.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn role_display_matches_wire_format() {
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert_eq!(MessageKind::ActionResult.to_string(), "action_result");
    }
}
