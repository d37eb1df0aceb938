//! Token estimation.
//!
//! Counts are a deterministic, model-agnostic approximation: every run of
//! word characters is one token, and so is every other non-whitespace
//! character. This is not any model's real encoder and is not meant to be;
//! it only has to be stable, cheap, and roughly proportional. Callers hold a
//! [`TokenCounter`] trait object so a real tokenizer can be dropped in later.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::Message;

/// Framing overhead charged for every message (`{role/name}\n{content}\n`).
pub const TOKENS_PER_MESSAGE: usize = 4;

/// Overhead for priming the assistant's reply.
pub const REPLY_PRIMING_TOKENS: usize = 3;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|\S").expect("token pattern is a valid regex"));

/// Something that can measure text in tokens.
pub trait TokenCounter: Send + Sync + fmt::Debug {
    /// Byte ranges of every token in `text`, in order. Ranges never overlap
    /// and never contain whitespace.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }

    /// Tokens consumed by a message list sent as one request.
    ///
    /// Each message costs [`TOKENS_PER_MESSAGE`] plus its content; a `name`
    /// costs its own tokens but replaces the role token (-1). The list as a
    /// whole adds [`REPLY_PRIMING_TOKENS`].
    fn count_messages(&self, messages: &[Message]) -> usize {
        let body: usize = messages
            .iter()
            .map(|msg| {
                let base = TOKENS_PER_MESSAGE + self.count(&msg.content);
                match msg.name {
                    Some(ref name) => (base + self.count(name)).saturating_sub(1),
                    None => base,
                }
            })
            .sum();
        body + REPLY_PRIMING_TOKENS
    }
}

/// Shared handle to a counter, as held by the splitter, summarizer and assembler.
pub type SharedCounter = Arc<dyn TokenCounter>;

/// The default word/punctuation estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        TOKEN_PATTERN.find_iter(text).map(|m| m.range()).collect()
    }

    fn count(&self, text: &str) -> usize {
        TOKEN_PATTERN.find_iter(text).count()
    }
}

/// A [`SharedCounter`] wrapping [`HeuristicCounter`].
pub fn default_counter() -> SharedCounter {
    Arc::new(HeuristicCounter)
}

/// Count the tokens in a string with the default estimator.
pub fn count_string_tokens(text: &str) -> usize {
    HeuristicCounter.count(text)
}

/// Count the tokens of a message list with the default estimator.
pub fn count_message_tokens(messages: &[Message]) -> usize {
    HeuristicCounter.count_messages(messages)
}
