//! Context window management: token estimation, splitting, summarization,
//! history and per-turn assembly.
//!
//! The context window is the scarcest resource in any LLM agent. The layers
//! below keep every request inside it, leaf-first:
//!
//! 1. **[`tokens`]** — [`TokenCounter`] estimates the token cost of text and
//!    message lists.
//!
//! 2. **[`splitter`]** — [`TextSplitter`] cuts long text into balanced,
//!    sentence-aligned chunks with optional overlap.
//!
//! 3. **[`summarizer`]** — [`ChunkedSummarizer`] summarizes chunk by chunk and
//!    re-summarizes the joined summaries until they fit a budget.
//!
//! 4. **[`history`]** — [`MessageHistory`] keeps the verbatim message log and
//!    the running summary that older messages are folded into.
//!
//! 5. **[`assembler`]** — [`ContextAssembler`] lays out each turn's prompt:
//!    system prompt, timestamp, summary, most recent history, user input.
//!
//! [`budget`] holds the per-turn [`TokenBudget`] arithmetic shared by the
//! assembler and the agent.

pub mod assembler;
pub mod budget;
pub mod history;
pub mod splitter;
pub mod summarizer;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use assembler::{AssembledContext, AssemblerConfig, ContextAssembler};
pub use budget::{ContextUsage, TokenBudget};
pub use history::{Cycle, MessageHistory, PendingFold};
pub use splitter::{Chunk, SplitterConfig, TextSplitter};
pub use summarizer::{ChunkSummary, ChunkedSummarizer, Summary, SummarizerConfig, budget_for_model};
pub use tokens::{
    HeuristicCounter, SharedCounter, TokenCounter, count_message_tokens, count_string_tokens,
};
