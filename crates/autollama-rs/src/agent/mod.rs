//! Agent runtime: one turn at a time over a bounded context.
//!
//! - [`Agent`] owns the [`MessageHistory`] and runs turns: assemble the
//!   context, ask the model, then commit the fold and the new messages.
//! - [`reply`] describes the structured JSON reply the model is asked for.
//!
//! A turn that fails (retries exhausted, authentication, configuration)
//! leaves the history exactly as it was, so the same turn can be retried.

pub mod reply;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::completion::{Completer, Completion, CompletionRequest};
use crate::api::models::{ModelCatalog, StaticModelCatalog};
use crate::config::{AgentConfig, DEFAULT_CONTEXT_WINDOW};
use crate::context::assembler::ContextAssembler;
use crate::context::history::MessageHistory;
use crate::context::summarizer::{ChunkedSummarizer, Summary};
use crate::context::tokens::{SharedCounter, default_counter};
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::{Message, MessageKind};

pub use reply::{AssistantReply, Command, Thoughts, is_valid_reply, reply_schema};

/// An autonomous agent session.
pub struct Agent {
    config: AgentConfig,
    completer: Completer,
    counter: SharedCounter,
    catalog: Arc<dyn ModelCatalog>,
    memory: Option<Arc<dyn MemoryStore>>,
    assembler: ContextAssembler,
    history: MessageHistory,
    system_prompt: String,
    cycle_count: u32,
}

impl Agent {
    /// Create an agent that talks to `backend`.
    pub fn new(config: AgentConfig, backend: Arc<dyn Completion>) -> Result<Self> {
        config.validate()?;
        let completer = Completer::new(backend)
            .with_retry(config.retry.clone())
            .with_model(config.model.clone())
            .with_temperature(config.temperature);
        let counter = default_counter();
        Ok(Self {
            assembler: ContextAssembler::new(Arc::clone(&counter), config.assembler.clone()),
            history: MessageHistory::with_summary(config.initial_summary.clone()),
            completer,
            counter,
            catalog: Arc::new(StaticModelCatalog::new()),
            memory: None,
            system_prompt: String::new(),
            cycle_count: 0,
            config,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Store chunk summaries produced by [`Agent::summarize`] in `memory`.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Replace the token estimator.
    pub fn with_counter(mut self, counter: SharedCounter) -> Self {
        self.assembler = ContextAssembler::new(Arc::clone(&counter), self.config.assembler.clone());
        self.counter = counter;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Completed turns.
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// The model's context window: the configured override, else the
    /// catalog entry, else [`DEFAULT_CONTEXT_WINDOW`].
    pub fn context_window(&self) -> usize {
        if let Some(window) = self.config.context_window {
            return window;
        }
        self.catalog
            .context_window(&self.config.model)
            .unwrap_or_else(|| {
                warn!(
                    "Unknown context window for {}; assuming {DEFAULT_CONTEXT_WINDOW}",
                    self.config.model
                );
                DEFAULT_CONTEXT_WINDOW
            })
    }

    /// Run one turn: send `user_input` with as much history as fits and
    /// return the model's reply.
    ///
    /// On success the history gains the user input and the reply, and any
    /// messages that no longer fit are folded into the running summary. On
    /// error the history is unchanged.
    pub async fn step(&mut self, user_input: &str) -> Result<String> {
        let limit = self.context_window();
        let context = self
            .assembler
            .assemble(
                &self.completer,
                &self.system_prompt,
                &self.history,
                user_input,
                limit,
            )
            .await?;

        debug!(
            "Turn {}: {} messages, {} history included, {} tokens left for the reply",
            self.cycle_count + 1,
            context.messages.len(),
            context.included,
            context.tokens_remaining
        );

        let max_tokens = u32::try_from(context.tokens_remaining).unwrap_or(u32::MAX);
        let request = CompletionRequest::new(context.messages).with_max_tokens(max_tokens);
        let reply = self.completer.complete(request).await?;

        if let Some(fold) = context.fold {
            let folded = self.history.apply_fold(fold);
            info!("Folded {} message(s) into the running summary", folded.len());
        }
        self.history.append(Message::user(user_input));
        self.history
            .append(Message::assistant(reply.clone()).with_kind(MessageKind::AiResponse));
        self.cycle_count += 1;

        if !is_valid_reply(&reply) {
            debug!("Turn {} reply does not match the reply schema", self.cycle_count);
        }
        Ok(reply)
    }

    /// Record the outcome of the command the last reply asked for.
    pub fn record_result(&mut self, result: impl Into<String>) {
        self.history
            .append(Message::system(result).with_kind(MessageKind::ActionResult));
    }

    /// Summarize `text` with a chunk budget derived from the model's
    /// context window.
    pub async fn summarize(
        &self,
        text: &str,
        instruction: Option<&str>,
        question: Option<&str>,
    ) -> Result<Summary> {
        let budget = self.config.summarizer.budget_for(self.context_window());
        self.summarizer().summarize(text, budget, instruction, question).await
    }

    /// A summarizer sharing this agent's completer, estimator and memory.
    pub fn summarizer(&self) -> ChunkedSummarizer {
        let summarizer = ChunkedSummarizer::new(
            self.completer.clone(),
            Arc::clone(&self.counter),
            self.config.summarizer.clone(),
        )
        .with_splitter_config(self.config.splitter.clone());
        match self.memory {
            Some(ref memory) => summarizer.with_memory(Arc::clone(memory)),
            None => summarizer,
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("completer", &self.completer)
            .field("history_len", &self.history.len())
            .field("cycle_count", &self.cycle_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::completion::FnCompletion;
    use crate::context::history::INITIAL_SUMMARY;
    use crate::context::tokens::count_message_tokens;
    use crate::memory::InMemoryStore;
    use crate::{CompletionError, Error, MessageRole};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const REPLY: &str = r#"{"thoughts": {"text": "t", "reasoning": "r", "plan": "- p", "criticism": "c", "speak": "s"}, "command": {"name": "ls", "args": {}}}"#;

    fn is_fold_request(req: &CompletionRequest) -> bool {
        req.prompt_text().contains("Latest Development:")
    }

    #[tokio::test]
    async fn step_appends_the_turn() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let backend = FnCompletion::new(move |req| {
            seen_clone.lock().unwrap().push(req.clone());
            Ok(REPLY.into())
        });
        let mut agent = Agent::new(AgentConfig::default(), Arc::new(backend))
            .unwrap()
            .with_system_prompt("You are Entrepreneur-GPT.");

        let reply = agent.step("Determine which next command to use").await.unwrap();
        assert_eq!(reply, REPLY);
        assert_eq!(agent.cycle_count(), 1);

        let messages = agent.history().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].kind, Some(MessageKind::AiResponse));

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model.as_deref(), Some("meta-llama/llama-3-8b-instruct"));
        assert_eq!(request.messages[0].content, "You are Entrepreneur-GPT.");
        let max_tokens = request.max_tokens.unwrap() as usize;
        assert!(max_tokens > 1000 && max_tokens < 8000);
    }

    #[tokio::test]
    async fn results_are_action_results_and_cycles() {
        let mut agent =
            Agent::new(AgentConfig::default(), Arc::new(FnCompletion::constant(REPLY))).unwrap();
        agent.step("next?").await.unwrap();
        agent.record_result("Command ls returned: Cargo.toml src");

        let last = agent.history().messages().last().unwrap();
        assert_eq!(last.role, MessageRole::System);
        assert_eq!(last.kind, Some(MessageKind::ActionResult));
        assert_eq!(agent.history().per_cycle().count(), 1);
    }

    #[tokio::test]
    async fn failed_turn_leaves_history_untouched() {
        let healthy = Arc::new(AtomicBool::new(false));
        let healthy_clone = Arc::clone(&healthy);
        let backend = FnCompletion::new(move |req| {
            if is_fold_request(req) {
                return Ok("I listed many files.".into());
            }
            if healthy_clone.load(Ordering::SeqCst) {
                Ok(REPLY.into())
            } else {
                Err(CompletionError::Authentication("expired key".into()))
            }
        });
        // Room for the mandatory part and a couple of results only.
        let config = AgentConfig::default().with_context_window(1000 + 500 + 150);
        let mut agent = Agent::new(config, Arc::new(backend)).unwrap();
        for i in 0..6 {
            agent.record_result(format!("Command ls returned: {}", "file ".repeat(20 + i)));
        }

        let err = agent.step("next?").await.unwrap_err();
        assert!(matches!(err, Error::Completion(CompletionError::Authentication(_))));
        assert_eq!(agent.history().len(), 6);
        assert_eq!(agent.history().last_trimmed_index(), 0);
        assert_eq!(agent.history().summary(), INITIAL_SUMMARY);
        assert_eq!(agent.cycle_count(), 0);

        healthy.store(true, Ordering::SeqCst);
        agent.step("next?").await.unwrap();
        assert!(agent.history().last_trimmed_index() > 0);
        assert_eq!(agent.history().summary(), "I listed many files.");
        assert_eq!(agent.history().len(), 8);
    }

    /// Agent whose fold calls return `fold_summary` and whose reply requests
    /// are recorded.
    fn agent_with_long_summary(
        fold_summary: String,
    ) -> (Agent, Arc<Mutex<Vec<CompletionRequest>>>) {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let replies_clone = Arc::clone(&replies);
        let backend = FnCompletion::new(move |req| {
            if is_fold_request(req) {
                return Ok(fold_summary.clone());
            }
            replies_clone.lock().unwrap().push(req.clone());
            Ok(REPLY.into())
        });
        let config = AgentConfig::default()
            .with_context_window(2000)
            .with_initial_summary("word ".repeat(1500));
        let mut agent = Agent::new(config, Arc::new(backend)).unwrap();
        agent.record_result("Command ls returned: Cargo.toml src");
        (agent, replies)
    }

    #[tokio::test]
    async fn long_summary_never_eats_the_response_reserve() {
        let (mut agent, replies) = agent_with_long_summary("I listed the files.".into());
        agent.step("next?").await.unwrap();

        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        let sent = count_message_tokens(&replies[0].messages);
        assert!(sent <= 2000 - 1000);
        assert!(replies[0].max_tokens.unwrap() as usize >= 1000);
        assert_eq!(agent.history().summary(), "I listed the files.");
    }

    #[tokio::test]
    async fn summary_too_long_to_send_fails_the_turn() {
        let (mut agent, replies) = agent_with_long_summary("word ".repeat(1500));
        let err = agent.step("next?").await.unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(replies.lock().unwrap().is_empty());
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history().last_trimmed_index(), 0);
    }

    #[tokio::test]
    async fn summarize_uses_model_budget() {
        let memory = Arc::new(InMemoryStore::new());
        let backend = FnCompletion::constant("short");
        let agent = Agent::new(AgentConfig::default().with_context_window(1700), Arc::new(backend))
            .unwrap()
            .with_memory(Arc::clone(&memory) as Arc<dyn MemoryStore>);

        // 1700 - 1 - 550 = 1149 tokens per chunk.
        let text = "Lorem ipsum dolor sit amet. ".repeat(300);
        let summary = agent.summarize(&text, None, None).await.unwrap();
        assert_eq!(summary.text, "short");
        assert!(summary.chunk_count() >= 2);
        assert_eq!(memory.len(), summary.chunk_count());
    }

    #[test]
    fn context_window_prefers_override_then_catalog() {
        let backend: Arc<dyn Completion> = Arc::new(FnCompletion::constant(""));
        let agent = Agent::new(AgentConfig::default(), Arc::clone(&backend)).unwrap();
        assert_eq!(agent.context_window(), 8000);

        let agent = Agent::new(AgentConfig::new("mystery-7b"), Arc::clone(&backend))
            .unwrap()
            .with_catalog(Arc::new(StaticModelCatalog::new().with_model("mystery-7b", 32_000)));
        assert_eq!(agent.context_window(), 32_000);

        let agent =
            Agent::new(AgentConfig::new("mystery-7b").with_context_window(2048), backend).unwrap();
        assert_eq!(agent.context_window(), 2048);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = Agent::new(
            AgentConfig::default().with_context_window(10),
            Arc::new(FnCompletion::constant("")),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
