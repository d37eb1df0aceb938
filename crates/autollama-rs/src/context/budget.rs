//! Per-turn token budget.
//!
//! A model's context window is shared by the prompt we send and the reply it
//! writes. [`TokenBudget`] withholds a response reserve from the window and
//! a summary reserve from what is left, and reports how much of the window a
//! message list consumes.

use crate::Message;
use crate::context::tokens::TokenCounter;
use crate::error::{Error, Result};

/// Tokens withheld from every send so the model has room to answer.
pub const DEFAULT_RESPONSE_RESERVE: usize = 1000;

/// Tokens set aside for the running-summary message.
pub const DEFAULT_SUMMARY_RESERVE: usize = 500;

/// Budget for one assembled context.
///
/// # Example
///
/// ```
/// use autollama_rs::context::budget::TokenBudget;
///
/// let budget = TokenBudget::new(8000).with_response_reserve(1000);
/// assert_eq!(budget.send_budget().unwrap(), 7000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// The model's context window in tokens.
    context_window: usize,
    /// Tokens withheld for the model's reply.
    response_reserve: usize,
    /// Tokens set aside for the summary message.
    summary_reserve: usize,
}

impl TokenBudget {
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            response_reserve: DEFAULT_RESPONSE_RESERVE,
            summary_reserve: DEFAULT_SUMMARY_RESERVE,
        }
    }

    pub fn with_response_reserve(mut self, tokens: usize) -> Self {
        self.response_reserve = tokens;
        self
    }

    pub fn with_summary_reserve(mut self, tokens: usize) -> Self {
        self.summary_reserve = tokens;
        self
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn summary_reserve(&self) -> usize {
        self.summary_reserve
    }

    /// Tokens the prompt may use: the window minus the response reserve.
    ///
    /// A reserve that swallows the whole window is a configuration error.
    pub fn send_budget(&self) -> Result<usize> {
        if self.response_reserve >= self.context_window {
            return Err(Error::config(format!(
                "response reserve ({}) leaves no room in a {}-token context window",
                self.response_reserve, self.context_window
            )));
        }
        Ok(self.context_window - self.response_reserve)
    }

    /// Tokens left for the reply once `used` prompt tokens are sent.
    pub fn remaining(&self, used: usize) -> usize {
        self.context_window.saturating_sub(used)
    }

    /// Measure a message list against the context window.
    pub fn usage(&self, counter: &dyn TokenCounter, messages: &[Message]) -> ContextUsage {
        let estimated_tokens = counter.count_messages(messages);
        let usage_pct = if self.context_window > 0 {
            estimated_tokens as f64 / self.context_window as f64
        } else {
            1.0
        };
        ContextUsage {
            estimated_tokens,
            max_tokens: self.context_window,
            usage_pct,
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    /// Estimated tokens consumed.
    pub estimated_tokens: usize,
    /// Context window.
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.estimated_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}
