//! The completion seam.
//!
//! Everything in the core that needs a model goes through [`Completer`],
//! which pairs a [`Completion`] backend with a [`RetryConfig`]. Backends are
//! the remote client ([`OpenRouterClient`]) in production and
//! [`FnCompletion`] closures in tests.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::api::retry::{RetryConfig, retry_call};
use crate::error::{CompletionError, Result};
use crate::{ChatRequest, Message, OpenRouterClient, ResponseFormat, ResponseFormatType};

/// Boxed future returned by [`Completion::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, CompletionError>> + Send + 'a>>;

/// One request to the completion primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier. Filled in by [`Completer`] when left empty.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    /// Maximum tokens the model may produce in its reply.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Concatenated content of every message, for stubs and logging.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A model that turns a message list into reply text.
///
/// Implementations perform exactly one attempt; retry lives in [`Completer`].
pub trait Completion: Send + Sync {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;
}

/// Type-erased synchronous handler for [`FnCompletion`].
type ErasedCompletionHandler = Box<
    dyn Fn(&CompletionRequest) -> std::result::Result<String, CompletionError> + Send + Sync,
>;

/// Closure-backed [`Completion`], mostly for deterministic tests.
///
/// # Example
///
/// ```
/// use autollama_rs::api::completion::{Completion, CompletionRequest, FnCompletion};
/// use autollama_rs::Message;
///
/// let echo = FnCompletion::new(|req: &CompletionRequest| Ok(req.prompt_text()));
/// let req = CompletionRequest::new(vec![Message::user("ping")]);
/// let reply = futures::executor::block_on(echo.complete(&req)).unwrap();
/// assert_eq!(reply, "ping");
/// ```
pub struct FnCompletion {
    handler: ErasedCompletionHandler,
}

impl FnCompletion {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> std::result::Result<String, CompletionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    /// A completion that always answers with `reply`.
    pub fn constant(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }
}

impl Completion for FnCompletion {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        let result = (self.handler)(request);
        Box::pin(async move { result })
    }
}

impl fmt::Debug for FnCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCompletion").finish_non_exhaustive()
    }
}

impl Completion for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(async move {
            let model = request.model.clone().ok_or_else(|| {
                CompletionError::Configuration("no model set on completion request".into())
            })?;
            let body = ChatRequest {
                model,
                messages: request.messages.clone(),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                response_format: self.json_mode.then_some(ResponseFormat {
                    fmt_type: ResponseFormatType::JsonObject,
                }),
            };
            let completion = self.chat(&body).await?;
            completion
                .content
                .ok_or_else(|| CompletionError::InvalidResponse("empty LLM response".into()))
        })
    }
}

/// A [`Completion`] backend plus the retry policy and default model that
/// every call made through it uses.
#[derive(Clone)]
pub struct Completer {
    backend: Arc<dyn Completion>,
    retry: RetryConfig,
    model: Option<String>,
    temperature: Option<f32>,
}

impl Completer {
    pub fn new(backend: Arc<dyn Completion>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            model: None,
            temperature: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Model used when a request does not name one.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Temperature used when a request does not set one.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Issue a completion, retrying per the configured policy.
    pub async fn complete(&self, mut request: CompletionRequest) -> Result<String> {
        if request.model.is_none() {
            request.model = self.model.clone();
        }
        if request.temperature.is_none() {
            request.temperature = self.temperature;
        }
        debug!(
            "Completion: model={:?}, messages={}, max_tokens={:?}",
            request.model,
            request.messages.len(),
            request.max_tokens
        );
        let reply = retry_call(&self.retry, || self.backend.complete(&request)).await?;
        trace!("Completion reply: {reply}");
        Ok(reply)
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("retry", &self.retry)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}
