//! Per-turn context assembly.
//!
//! The prompt sent each turn is laid out as:
//!
//! ```text
//! [system prompt] [current time] [running summary] [live history ...] [user input]
//! ```
//!
//! History is taken newest-first until the send budget runs out, so recency
//! always wins over completeness. Live messages that did not make it are
//! folded into the running summary. The fold is computed here but returned
//! uncommitted in [`AssembledContext::fold`]; the caller applies it to the
//! history once the turn has succeeded.

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::Message;
use crate::api::completion::Completer;
use crate::context::budget::{DEFAULT_RESPONSE_RESERVE, DEFAULT_SUMMARY_RESERVE, TokenBudget};
use crate::context::history::{MessageHistory, PendingFold};
use crate::context::tokens::SharedCounter;
use crate::error::{Error, Result};

/// Reserves applied to every assembled context.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Tokens withheld from the context window for the model's reply.
    pub response_reserve: usize,
    /// Tokens set aside for the running-summary message.
    pub summary_reserve: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            response_reserve: DEFAULT_RESPONSE_RESERVE,
            summary_reserve: DEFAULT_SUMMARY_RESERVE,
        }
    }
}

/// The prompt for one turn.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Messages to send, in order.
    pub messages: Vec<Message>,
    /// Context window left for the reply.
    pub tokens_remaining: usize,
    /// Number of history messages included verbatim.
    pub included: usize,
    /// Fold of the live messages that did not fit, not yet applied.
    pub fold: Option<PendingFold>,
}

/// The "current time" message placed after the system prompt.
pub fn timestamp_message(now: DateTime<Local>) -> Message {
    Message::system(format!("The current time and date is {}", now.format("%c")))
}

/// Builds the message list for each turn.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    counter: SharedCounter,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(counter: SharedCounter, config: AssemblerConfig) -> Self {
        Self { counter, config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble the context for `user_input` at the current local time.
    pub async fn assemble(
        &self,
        completer: &Completer,
        system_prompt: &str,
        history: &MessageHistory,
        user_input: &str,
        model_token_limit: usize,
    ) -> Result<AssembledContext> {
        self.assemble_at(
            completer,
            system_prompt,
            history,
            user_input,
            model_token_limit,
            Local::now(),
        )
        .await
    }

    /// Assemble the context with an explicit timestamp.
    pub async fn assemble_at(
        &self,
        completer: &Completer,
        system_prompt: &str,
        history: &MessageHistory,
        user_input: &str,
        model_token_limit: usize,
        now: DateTime<Local>,
    ) -> Result<AssembledContext> {
        let budget = TokenBudget::new(model_token_limit)
            .with_response_reserve(self.config.response_reserve)
            .with_summary_reserve(self.config.summary_reserve);
        let send_budget = budget.send_budget()?;

        let seed = vec![Message::system(system_prompt), timestamp_message(now)];
        let user_message = Message::user(user_input);

        let mandatory = self.counter.count_messages(&seed)
            + self.counter.count_messages(std::slice::from_ref(&user_message))
            + budget.summary_reserve();
        if mandatory > send_budget {
            return Err(Error::config(format!(
                "system prompt, summary reserve and user input need {mandatory} tokens \
                 but only {send_budget} of {model_token_limit} can be sent"
            )));
        }

        // The running summary is charged at its real size once it outgrows
        // the reserve.
        let summary_tokens = if history.is_empty() {
            0
        } else {
            self.counter
                .count_messages(std::slice::from_ref(&history.summary_message()))
        };
        let live = history.live();
        let mut used =
            mandatory - budget.summary_reserve() + budget.summary_reserve().max(summary_tokens);
        let mut included = 0;
        for message in live.iter().rev() {
            let tokens = self.counter.count_messages(std::slice::from_ref(message));
            if used + tokens > send_budget {
                break;
            }
            used += tokens;
            included += 1;
        }
        debug!(
            "Including {included} of {} live history messages ({used}/{send_budget} tokens)",
            live.len()
        );

        // A fold may return a summary larger than planned for. Each overflow
        // drops the oldest kept messages and folds again, until the prompt fits
        // or there is no history left to drop.
        loop {
            let kept = &live[live.len() - included..];
            let fold = history.prepare_fold(completer, kept).await?;
            let summary_message = (!history.is_empty()).then(|| match fold {
                Some(ref fold) => fold.summary_message(),
                None => history.summary_message(),
            });

            let messages = layout(&seed, summary_message.as_ref(), kept, &user_message);
            let usage = budget.usage(self.counter.as_ref(), &messages);
            if usage.estimated_tokens <= send_budget {
                debug!("Assembled {} messages, {}", messages.len(), usage.to_log_string());
                return Ok(AssembledContext {
                    tokens_remaining: budget.remaining(usage.estimated_tokens),
                    messages,
                    included,
                    fold,
                });
            }
            if included == 0 {
                return Err(Error::config(format!(
                    "running summary leaves no room: prompt needs {} tokens \
                     but only {send_budget} of {model_token_limit} can be sent",
                    usage.estimated_tokens
                )));
            }

            while included > 0 {
                included -= 1;
                let candidate = layout(
                    &seed,
                    summary_message.as_ref(),
                    &live[live.len() - included..],
                    &user_message,
                );
                if self.counter.count_messages(&candidate) <= send_budget {
                    break;
                }
            }
            warn!(
                "Running summary outgrew its reserve; keeping {included} history message(s) and folding again"
            );
        }
    }
}

fn layout(
    seed: &[Message],
    summary: Option<&Message>,
    history: &[Message],
    user: &Message,
) -> Vec<Message> {
    let mut messages = seed.to_vec();
    messages.extend(summary.cloned());
    messages.extend(history.iter().cloned());
    messages.push(user.clone());
    messages
}
