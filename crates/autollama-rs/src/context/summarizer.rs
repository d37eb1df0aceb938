//! Chunked, recursive summarization.
//!
//! [`ChunkedSummarizer::summarize`] reduces a text of any length to one
//! summary that fits a token budget. Text that already fits is summarized
//! with a single completion call. Longer text is split with overlap, every
//! chunk is summarized, and the blank-line-joined chunk summaries are fed
//! back in until they fit. Each chunking pass counts toward
//! [`SummarizerConfig::max_depth`], so summaries that refuse to shrink end
//! in [`Error::SummarizationDepthExceeded`] instead of looping forever.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::Message;
use crate::api::completion::{Completer, CompletionRequest};
use crate::context::splitter::{SplitterConfig, TextSplitter};
use crate::context::tokens::SharedCounter;
use crate::error::{Error, Result};
use crate::memory::MemoryStore;

/// Reply limit for every summary call.
pub const SUMMARY_MAX_TOKENS: u32 = 500;

/// Tokens reserved for the prompt template plus the summary reply when
/// deriving a chunk budget from a context window.
pub const PROMPT_OVERHEAD_TOKENS: usize = 550;

/// Chunking passes allowed before giving up.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Configuration for chunked summarization.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Maximum tokens for each summarization response.
    pub max_summary_tokens: u32,
    /// Sampling temperature for summary calls.
    pub temperature: f32,
    /// Chunking passes allowed before failing.
    pub max_depth: usize,
    /// Tokens withheld from the context window by [`Self::budget_for`].
    pub prompt_overhead: usize,
    /// Summarize the chunks of a pass concurrently.
    pub parallel_chunks: bool,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_summary_tokens: SUMMARY_MAX_TOKENS,
            temperature: 0.0,
            max_depth: DEFAULT_MAX_DEPTH,
            prompt_overhead: PROMPT_OVERHEAD_TOKENS,
            parallel_chunks: false,
        }
    }
}

impl SummarizerConfig {
    /// Chunk budget for a model with the given context window.
    pub fn budget_for(&self, context_window: usize) -> usize {
        context_window.saturating_sub(1 + self.prompt_overhead)
    }
}

/// Default chunk budget for a model: `context_window - 1 - 550`.
pub fn budget_for_model(context_window: usize) -> usize {
    SummarizerConfig::default().budget_for(context_window)
}

/// One chunk of the first chunking pass and the summary produced for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub summary: String,
    pub chunk: String,
}

/// Result of [`ChunkedSummarizer::summarize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// The final summary, exactly as the model returned it.
    pub text: String,
    /// Per-chunk trace, present only when the input had to be chunked.
    pub trace: Option<Vec<ChunkSummary>>,
}

impl Summary {
    /// Number of chunks in the first pass (0 when no chunking happened).
    pub fn chunk_count(&self) -> usize {
        self.trace.as_ref().map_or(0, Vec::len)
    }
}

/// Build the summarization prompt for one piece of text.
pub fn summarization_prompt(text: &str, instruction: Option<&str>) -> String {
    let instruction = instruction.map(|i| format!("; {i}")).unwrap_or_default();
    format!(
        "Write a concise summary of the following text{instruction}:\n\n\n\
         LITERAL TEXT: \"\"\"{text}\"\"\"\n\n\n\
         CONCISE SUMMARY: The text is best summarized as"
    )
}

/// The instruction used when summarizing with a question in mind.
pub fn question_instruction(question: &str) -> String {
    format!(
        "include any information that can be used to answer the question \"{question}\". \
         Do not directly answer the question itself."
    )
}

/// Recursive summarizer over a [`Completer`].
#[derive(Clone)]
pub struct ChunkedSummarizer {
    completer: Completer,
    counter: SharedCounter,
    splitter: TextSplitter,
    config: SummarizerConfig,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl ChunkedSummarizer {
    pub fn new(completer: Completer, counter: SharedCounter, config: SummarizerConfig) -> Self {
        let splitter = TextSplitter::new(Arc::clone(&counter), SplitterConfig::default());
        Self {
            completer,
            counter,
            splitter,
            config,
            memory: None,
        }
    }

    pub fn with_splitter_config(mut self, config: SplitterConfig) -> Self {
        self.splitter = TextSplitter::new(Arc::clone(&self.counter), config);
        self
    }

    /// Persist every chunk summary to `memory`.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Summarize `text` into at most `budget` tokens of prompt per call.
    ///
    /// `instruction` and `question` are mutually exclusive. The instruction
    /// applies to the first summarization pass only; recombining chunk
    /// summaries uses the plain prompt.
    pub async fn summarize(
        &self,
        text: &str,
        budget: usize,
        instruction: Option<&str>,
        question: Option<&str>,
    ) -> Result<Summary> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        let instruction = match (instruction, question) {
            (Some(_), Some(_)) => return Err(Error::ConflictingInstruction),
            (Some(instruction), None) => Some(instruction.to_string()),
            (None, Some(question)) => Some(question_instruction(question)),
            (None, None) => None,
        };

        let mut current = text.to_string();
        let mut instruction = instruction.as_deref();
        let mut trace = None;
        let mut depth = 0;

        loop {
            let tokens = self.counter.count(&current);
            if tokens <= budget {
                debug!("Summarizing {tokens} tokens in one call (budget {budget})");
                let text = self.summarize_once(&current, instruction).await?;
                return Ok(Summary { text, trace });
            }
            if depth == self.config.max_depth {
                return Err(Error::SummarizationDepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            depth += 1;

            let chunks = self.splitter.split(&current, budget, true)?;
            info!(
                "Summarizing {tokens} tokens as {} chunks (pass {depth}/{})",
                chunks.len(),
                self.config.max_depth
            );
            let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let summaries = self.summarize_chunks(&texts, instruction).await?;

            if let Some(ref memory) = self.memory {
                for summary in &summaries {
                    memory.add(summary);
                }
            }

            let combined = summaries.join("\n\n");
            if trace.is_none() {
                trace = Some(
                    summaries
                        .into_iter()
                        .zip(texts)
                        .map(|(summary, chunk)| ChunkSummary {
                            summary,
                            chunk: chunk.to_string(),
                        })
                        .collect(),
                );
            }
            current = combined;
            instruction = None;
        }
    }

    /// Summaries of `chunks`, in chunk order.
    async fn summarize_chunks(&self, chunks: &[&str], instruction: Option<&str>) -> Result<Vec<String>> {
        if self.config.parallel_chunks {
            return try_join_all(chunks.iter().map(|chunk| self.summarize_once(chunk, instruction)))
                .await;
        }
        let mut summaries = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            info!("Summarizing chunk {} / {}", i + 1, chunks.len());
            summaries.push(self.summarize_once(chunk, instruction).await?);
        }
        Ok(summaries)
    }

    async fn summarize_once(&self, text: &str, instruction: Option<&str>) -> Result<String> {
        let request =
            CompletionRequest::new(vec![Message::user(summarization_prompt(text, instruction))])
                .with_max_tokens(self.config.max_summary_tokens)
                .with_temperature(self.config.temperature);
        self.completer.complete(request).await
    }
}

impl std::fmt::Debug for ChunkedSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSummarizer")
            .field("completer", &self.completer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionError;
    use crate::api::completion::FnCompletion;
    use crate::context::tokens::{count_string_tokens, default_counter};
    use crate::memory::InMemoryStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// The literal text embedded in a summarization prompt.
    fn literal_text(prompt: &str) -> &str {
        let start = prompt.find("\"\"\"").map(|i| i + 3).unwrap_or(0);
        let end = prompt.rfind("\"\"\"").unwrap_or(prompt.len());
        &prompt[start..end]
    }

    fn summarizer(backend: FnCompletion) -> ChunkedSummarizer {
        ChunkedSummarizer::new(
            Completer::new(Arc::new(backend)),
            default_counter(),
            SummarizerConfig::default(),
        )
    }

    fn long_text() -> String {
        (1..=12)
            .map(|i| format!("Paragraph {i} talks about topic number {i} in some detail. "))
            .collect()
    }

    #[test]
    fn prompt_embeds_text_and_instruction() {
        let plain = summarization_prompt("abc", None);
        assert!(plain.starts_with("Write a concise summary of the following text:"));
        assert!(plain.contains("LITERAL TEXT: \"\"\"abc\"\"\""));
        assert!(plain.ends_with("The text is best summarized as"));

        let framed = summarization_prompt("abc", Some("focus on dates"));
        assert!(framed.contains("following text; focus on dates:"));
    }

    #[test]
    fn chunk_budget_reserves_prompt_overhead() {
        assert_eq!(budget_for_model(8000), 8000 - 1 - 550);
        assert_eq!(budget_for_model(100), 0);
    }

    #[tokio::test]
    async fn short_input_is_one_call_returned_verbatim() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let s = summarizer(FnCompletion::new(move |req| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.max_tokens, Some(SUMMARY_MAX_TOKENS));
            assert_eq!(req.temperature, Some(0.0));
            Ok("  raw output, untouched \n".into())
        }));

        let summary = s.summarize("A short note.", 100, None, None).await.unwrap();
        assert_eq!(summary.text, "  raw output, untouched \n");
        assert!(summary.trace.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let s = summarizer(FnCompletion::constant("unused"));
        assert!(matches!(
            s.summarize("", 100, None, None).await,
            Err(Error::EmptyInput)
        ));
        assert!(matches!(
            s.summarize(" \n ", 100, None, None).await,
            Err(Error::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn instruction_and_question_conflict() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let s = summarizer(FnCompletion::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok("x".into())
        }));
        let err = s
            .summarize("text", 100, Some("be brief"), Some("why?"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingInstruction));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn question_becomes_instruction() {
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_clone = Arc::clone(&seen);
        let s = summarizer(FnCompletion::new(move |req| {
            *seen_clone.lock().unwrap() = req.prompt_text();
            Ok("answer material".into())
        }));
        s.summarize("Some facts.", 100, None, Some("Who won?"))
            .await
            .unwrap();
        let prompt = seen.lock().unwrap().clone();
        assert!(prompt.contains(
            "include any information that can be used to answer the question \"Who won?\""
        ));
        assert!(prompt.contains("Do not directly answer the question itself."));
    }

    #[tokio::test]
    async fn long_input_is_chunked_and_recombined() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let prompts_clone = Arc::clone(&prompts);
        let s = summarizer(FnCompletion::new(move |req| {
            let prompt = req.prompt_text();
            prompts_clone.lock().unwrap().push(prompt.clone());
            let words: Vec<&str> = literal_text(&prompt).split_whitespace().take(2).collect();
            Ok(words.join(" "))
        }));

        let text = long_text();
        let budget = 40;
        assert!(count_string_tokens(&text) > budget);

        let summary = s.summarize(&text, budget, Some("keep numbers"), None).await.unwrap();
        let trace = summary.trace.clone().unwrap();
        assert!(trace.len() > 1);
        assert_eq!(trace[0].summary, "Paragraph 1");
        assert!(trace[0].chunk.starts_with("Paragraph 1 talks"));

        let prompts = prompts.lock().unwrap();
        // One call per chunk plus the recombination call.
        assert_eq!(prompts.len(), trace.len() + 1);
        assert!(prompts[..trace.len()].iter().all(|p| p.contains("; keep numbers:")));
        let last = prompts.last().unwrap();
        assert!(!last.contains("keep numbers"));
        let joined: Vec<&str> = trace.iter().map(|t| t.summary.as_str()).collect();
        assert_eq!(literal_text(last), joined.join("\n\n"));
        assert_eq!(summary.text, "Paragraph 1");
    }

    #[tokio::test]
    async fn parallel_chunks_keep_their_order() {
        let backend = FnCompletion::new(|req| {
            let prompt = req.prompt_text();
            let words: Vec<&str> = literal_text(&prompt).split_whitespace().take(2).collect();
            Ok(words.join(" "))
        });
        let sequential = summarizer(backend);
        let parallel = sequential.clone();
        let parallel = ChunkedSummarizer {
            config: SummarizerConfig {
                parallel_chunks: true,
                ..SummarizerConfig::default()
            },
            ..parallel
        };

        let text = long_text();
        let a = sequential.summarize(&text, 40, None, None).await.unwrap();
        let b = parallel.summarize(&text, 40, None, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shrinking_summaries_terminate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let s = summarizer(FnCompletion::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok("a fixed short summary".into())
        }));
        let text = "word ".repeat(2000);
        let summary = s.summarize(&text, 30, None, None).await.unwrap();
        assert_eq!(summary.text, "a fixed short summary");
        assert!(calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn growing_summaries_hit_the_depth_cap() {
        let s = summarizer(FnCompletion::constant("word ".repeat(30)));
        let err = s
            .summarize(&"word ".repeat(100), 20, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SummarizationDepthExceeded {
                max_depth: DEFAULT_MAX_DEPTH
            }
        ));
    }

    #[tokio::test]
    async fn chunk_summaries_go_to_memory() {
        let memory = Arc::new(InMemoryStore::new());
        let s = summarizer(FnCompletion::constant("remember me"))
            .with_memory(Arc::clone(&memory) as Arc<dyn MemoryStore>);
        let summary = s.summarize(&long_text(), 40, None, None).await.unwrap();
        assert_eq!(memory.len(), summary.chunk_count());
    }

    #[tokio::test]
    async fn completion_failures_propagate() {
        let s = summarizer(FnCompletion::new(|_| {
            Err(CompletionError::Authentication("no key".into()))
        }));
        let err = s.summarize("text", 100, None, None).await.unwrap_err();
        assert!(matches!(err, Error::Completion(CompletionError::Authentication(_))));
    }
}
