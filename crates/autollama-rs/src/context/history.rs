//! Message history with a running summary.
//!
//! Messages are appended verbatim and never reordered. Messages before
//! [`MessageHistory::last_trimmed_index`] are *folded*: they live on only
//! inside the running summary. Folding happens when the context assembler
//! could not fit a message into the prompt; the dropped messages are handed
//! to the model together with the old summary and the reply becomes the new
//! summary.
//!
//! Folding is split into [`MessageHistory::prepare_fold`], which calls the
//! model but leaves the history untouched, and [`MessageHistory::apply_fold`],
//! which commits. The agent commits only once its turn has succeeded, so a
//! failed turn can be retried against the same history.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::reply::is_valid_reply;
use crate::api::completion::{Completer, CompletionRequest};
use crate::error::Result;
use crate::{Message, MessageKind, MessageRole};

/// Summary of a brand-new agent.
pub const INITIAL_SUMMARY: &str = "I was created";

const SUMMARY_MESSAGE_PREFIX: &str = "This reminds you of these events from your past: \n";

const FOLD_INSTRUCTIONS: &str = "\
Your task is to create a concise running summary of actions and information results in the \
provided text, focusing on key and potentially important information to remember.

You will receive the current summary and your latest actions. Combine them, adding relevant \
key information from the latest development in 1st person past tense and keeping the summary \
concise.";

const NOTHING_NEW: &str = "Nothing new happened.";

/// A new summary computed by [`MessageHistory::prepare_fold`], not yet
/// committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFold {
    /// The summary that replaces the current one.
    pub summary: String,
    /// New value for `last_trimmed_index` (exclusive).
    pub boundary: usize,
    /// The messages folded into `summary`.
    pub folded: Vec<Message>,
}

impl PendingFold {
    /// The summary message this fold will produce once applied.
    pub fn summary_message(&self) -> Message {
        summary_message(&self.summary)
    }
}

/// One agent cycle: the prompt that triggered it (if any), the AI reply and
/// the result of the command the reply asked for.
#[derive(Debug, Clone, Copy)]
pub struct Cycle<'a> {
    pub user: Option<&'a Message>,
    pub ai_response: &'a Message,
    pub action_result: &'a Message,
}

/// An event as shown to the model when folding.
#[derive(Debug, Serialize)]
struct FoldEvent {
    role: &'static str,
    content: String,
}

/// Chronological message log plus the running summary.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: Vec<Message>,
    summary: String,
    last_trimmed_index: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::with_summary(INITIAL_SUMMARY)
    }

    /// A history whose running summary starts as `summary`.
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            summary: summary.into(),
            last_trimmed_index: 0,
        }
    }

    pub fn append(&mut self, message: Message) {
        debug!("Appending {} message ({} chars)", message.role, message.content.len());
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Number of leading messages already folded into the summary.
    pub fn last_trimmed_index(&self) -> usize {
        self.last_trimmed_index
    }

    /// Messages that have not been folded yet.
    pub fn live(&self) -> &[Message] {
        self.messages
            .get(self.last_trimmed_index..)
            .unwrap_or_default()
    }

    /// The running summary as a system message for inclusion in prompts.
    pub fn summary_message(&self) -> Message {
        summary_message(&self.summary)
    }

    /// Fold every live message missing from `chain` into a new summary,
    /// without modifying the history.
    ///
    /// Returns `None`, without calling the model, when nothing needs folding.
    pub async fn prepare_fold(
        &self,
        completer: &Completer,
        chain: &[Message],
    ) -> Result<Option<PendingFold>> {
        let start = self.last_trimmed_index;
        let live = self.live();
        // A chain that is a suffix of the live tail is matched by position, so
        // an older copy of a kept message is still folded.
        let dropped: Vec<(usize, &Message)> = if live.ends_with(chain) {
            live[..live.len() - chain.len()]
                .iter()
                .enumerate()
                .map(|(i, msg)| (start + i, msg))
                .collect()
        } else {
            live.iter()
                .enumerate()
                .filter(|(_, msg)| !chain.contains(msg))
                .map(|(i, msg)| (start + i, msg))
                .collect()
        };

        let Some(&(last_index, _)) = dropped.last() else {
            debug!("No new messages to fold");
            return Ok(None);
        };

        let folded: Vec<Message> = dropped.into_iter().map(|(_, msg)| msg.clone()).collect();
        debug!(
            "Folding {} message(s) into the running summary (boundary {} -> {})",
            folded.len(),
            self.last_trimmed_index,
            last_index + 1
        );

        let prompt = fold_prompt(&self.summary, &folded);
        let summary = completer
            .complete(CompletionRequest::new(vec![Message::user(prompt)]))
            .await?;
        debug!("Updated summary: {summary}");

        Ok(Some(PendingFold {
            summary,
            boundary: last_index + 1,
            folded,
        }))
    }

    /// Commit a fold. The boundary never moves backwards and never passes
    /// the end of the history.
    pub fn apply_fold(&mut self, fold: PendingFold) -> Vec<Message> {
        self.summary = fold.summary;
        let boundary = fold.boundary.min(self.messages.len());
        self.last_trimmed_index = self.last_trimmed_index.max(boundary);
        fold.folded
    }

    /// Fold everything missing from `chain` and commit immediately.
    ///
    /// Returns the (possibly new) summary message and the messages that were
    /// folded.
    pub async fn trim(
        &mut self,
        completer: &Completer,
        chain: &[Message],
    ) -> Result<(Message, Vec<Message>)> {
        let folded = match self.prepare_fold(completer, chain).await? {
            Some(fold) => self.apply_fold(fold),
            None => Vec::new(),
        };
        Ok((self.summary_message(), folded))
    }

    /// Complete agent cycles in the history.
    ///
    /// An AI reply forms a cycle when it is valid reply JSON and is followed
    /// directly by an action result. Anything else is skipped.
    pub fn per_cycle(&self) -> impl Iterator<Item = Cycle<'_>> + '_ {
        let messages = &self.messages;
        (0..messages.len().saturating_sub(1)).filter_map(move |i| {
            let ai_response = &messages[i];
            if ai_response.kind != Some(MessageKind::AiResponse) {
                return None;
            }
            let user = i
                .checked_sub(1)
                .map(|prev| &messages[prev])
                .filter(|m| m.role == MessageRole::User);
            let action_result = &messages[i + 1];

            if !is_valid_reply(&ai_response.content) {
                debug!("Invalid item in message history: AI response at {i} is not a valid reply");
                return None;
            }
            if action_result.kind != Some(MessageKind::ActionResult) {
                debug!("Invalid item in message history: no action result after {i}");
                return None;
            }
            Some(Cycle {
                user,
                ai_response,
                action_result,
            })
        })
    }
}

fn summary_message(summary: &str) -> Message {
    Message::system(format!("{SUMMARY_MESSAGE_PREFIX}{summary}"))
}

/// Prompt asking the model to merge `events` into `summary`.
fn fold_prompt(summary: &str, events: &[Message]) -> String {
    let events: Vec<FoldEvent> = events.iter().filter_map(fold_event).collect();
    let development = if events.is_empty() {
        NOTHING_NEW.to_string()
    } else {
        serde_json::to_string(&events).unwrap_or_else(|_| NOTHING_NEW.to_string())
    };
    format!(
        "{FOLD_INSTRUCTIONS}\n\n\
         Summary So Far:\n\"\"\"\n{summary}\n\"\"\"\n\n\
         Latest Development:\n\"\"\"\n{development}\n\"\"\"\n"
    )
}

/// Relabel an event for the summarizer. User prompts are not events.
fn fold_event(message: &Message) -> Option<FoldEvent> {
    match message.role {
        MessageRole::User => None,
        MessageRole::System => Some(FoldEvent {
            role: "your computer",
            content: message.content.clone(),
        }),
        MessageRole::Assistant => Some(FoldEvent {
            role: "you",
            content: strip_thoughts(&message.content),
        }),
    }
}

/// Drop the `thoughts` field from an assistant's JSON reply.
fn strip_thoughts(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut map)) => {
            map.remove("thoughts");
            Value::Object(map).to_string()
        }
        Ok(_) => content.to_string(),
        Err(e) => {
            warn!("Invalid JSON in assistant reply while folding: {e}");
            content.to_string()
        }
    }
}
