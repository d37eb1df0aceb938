//! Sentence-aware, token-bounded text splitting.
//!
//! [`TextSplitter::split`] cuts a document into chunks of at most
//! `max_chunk_tokens` tokens. Chunks are contiguous slices of the input:
//!
//! 1. The text is segmented into sentences that tile it exactly (each
//!    sentence owns its trailing whitespace).
//! 2. Chunks aim for `target = ceil(total / ceil(total / max))` tokens so the
//!    document is spread over equally sized chunks instead of being packed
//!    greedily into the first ones.
//! 3. With overlap enabled, every chunk after the first starts with the last
//!    sentence of the chunk before it (or the tail of that sentence when it
//!    is too long), so summaries of neighbouring chunks share some context.
//! 4. A sentence longer than `max` is cut on token boundaries into pieces of
//!    at most `target` tokens, which are put back into the sentence stream.
//!
//! Concatenating [`Chunk::body`] over all chunks gives back the input.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::context::tokens::{SharedCounter, default_counter};
use crate::error::{Error, Result};

/// Upper bound on the overlap carried from one chunk into the next.
pub const MAX_OVERLAP_TOKENS: usize = 200;

/// Default weight of the incoming sentence in the "chunk reached its target"
/// test. A tunable, not a contract.
pub const DEFAULT_TARGET_BIAS: f64 = 0.5;

/// A sentence tail is only carried over when at least this many tokens of
/// overlap budget are available.
const MIN_PARTIAL_OVERLAP_TOKENS: usize = 5;

/// Terminal punctuation (plus closing quotes/brackets) followed by
/// whitespace, or a blank line.
static SENTENCE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["')\]]*\s+|\n[ \t]*\n\s*"#).expect("sentence pattern is a valid regex")
});

/// Splitter tunables.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Cap on overlap tokens between consecutive chunks.
    pub max_overlap_tokens: usize,
    /// A sentence is added to the open chunk only while
    /// `open + sentence - target_bias * sentence < target`.
    pub target_bias: f64,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_overlap_tokens: MAX_OVERLAP_TOKENS,
            target_bias: DEFAULT_TARGET_BIAS,
        }
    }
}

/// A contiguous slice of a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk text, overlap included.
    pub text: String,
    /// Token cost of `text`.
    pub token_length: usize,
    /// Byte length of the leading overlap copied from the previous chunk.
    pub overlap_len: usize,
}

impl Chunk {
    /// The part of the chunk that is not repeated from the previous chunk.
    pub fn body(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or_default()
    }

    /// The leading overlap region (empty for the first chunk).
    pub fn overlap(&self) -> &str {
        self.text.get(..self.overlap_len).unwrap_or_default()
    }
}

/// A measured range of the source text.
#[derive(Debug, Clone)]
struct Piece {
    range: Range<usize>,
    tokens: usize,
}

/// The chunk currently being filled.
#[derive(Debug)]
struct OpenChunk {
    start: usize,
    body_start: usize,
    end: usize,
    tokens: usize,
}

impl OpenChunk {
    fn new(piece: &Piece) -> Self {
        Self {
            start: piece.range.start,
            body_start: piece.range.start,
            end: piece.range.end,
            tokens: piece.tokens,
        }
    }

    fn push(&mut self, piece: &Piece) {
        self.end = piece.range.end;
        self.tokens += piece.tokens;
    }

    /// Prepend an overlap piece that ends where this chunk's body starts.
    fn prepend_overlap(&mut self, overlap: &Piece) {
        debug_assert_eq!(overlap.range.end, self.body_start);
        self.start = overlap.range.start;
        self.tokens += overlap.tokens;
    }
}

/// Splits text into token-bounded chunks.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    counter: SharedCounter,
    config: SplitterConfig,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(default_counter(), SplitterConfig::default())
    }
}

impl TextSplitter {
    pub fn new(counter: SharedCounter, config: SplitterConfig) -> Self {
        Self { counter, config }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Split `text` into chunks of at most `max_chunk_tokens` tokens.
    ///
    /// Empty or whitespace-only text yields no chunks.
    pub fn split(&self, text: &str, max_chunk_tokens: usize, with_overlap: bool) -> Result<Vec<Chunk>> {
        if max_chunk_tokens == 0 {
            return Err(Error::config("max_chunk_tokens must be at least 1"));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let total = self.counter.count(text);
        if total <= max_chunk_tokens {
            debug!("Text fits in one chunk ({total} <= {max_chunk_tokens} tokens)");
            return Ok(vec![Chunk {
                text: text.to_string(),
                token_length: total,
                overlap_len: 0,
            }]);
        }

        let n_chunks = total.div_ceil(max_chunk_tokens);
        let target = total.div_ceil(n_chunks);
        debug!(
            "Splitting {total} tokens into ~{n_chunks} chunks (target {target}, max {max_chunk_tokens})"
        );

        let mut queue: VecDeque<Piece> = sentence_ranges(text)
            .into_iter()
            .map(|range| Piece {
                tokens: self.counter.count(slice(text, &range)),
                range,
            })
            .collect();

        let mut chunks = Vec::new();
        let mut open: Option<OpenChunk> = None;
        let mut last: Option<Piece> = None;

        while let Some(piece) = queue.pop_front() {
            if piece.tokens > max_chunk_tokens {
                trace!(
                    "Sentence of {} tokens exceeds max; cutting on token boundaries",
                    piece.tokens
                );
                for part in self.cut_on_tokens(text, &piece, target).into_iter().rev() {
                    queue.push_front(part);
                }
                continue;
            }

            let fits = open.as_ref().is_none_or(|cur| {
                cur.tokens == 0 || self.accepts(cur.tokens, piece.tokens, max_chunk_tokens, target)
            });

            if fits {
                if let Some(cur) = open.as_mut() {
                    cur.push(&piece);
                } else {
                    open = Some(OpenChunk::new(&piece));
                }
            } else {
                if let Some(cur) = open.take() {
                    chunks.push(self.finish(text, cur));
                }
                let mut next = OpenChunk::new(&piece);
                if with_overlap
                    && let Some(ref prev) = last
                    && let Some(overlap) =
                        self.overlap_from(text, prev, piece.tokens, max_chunk_tokens)
                {
                    next.prepend_overlap(&overlap);
                }
                open = Some(next);
            }
            last = Some(piece);
        }

        if let Some(cur) = open {
            chunks.push(self.finish(text, cur));
        }

        debug!("Created {} chunks", chunks.len());
        Ok(chunks)
    }

    /// Whether a sentence of `sentence` tokens may join an open chunk of
    /// `current` tokens.
    fn accepts(&self, current: usize, sentence: usize, max: usize, target: usize) -> bool {
        if sentence == 0 {
            return true;
        }
        let expected = current + sentence;
        expected <= max
            && (expected as f64 - sentence as f64 * self.config.target_bias) < target as f64
    }

    /// The overlap to seed a new chunk with, taken from the tail of `prev`.
    fn overlap_from(&self, text: &str, prev: &Piece, next_tokens: usize, max: usize) -> Option<Piece> {
        let budget = self
            .config
            .max_overlap_tokens
            .min(max.saturating_sub(next_tokens));
        if budget == 0 || prev.tokens == 0 {
            return None;
        }
        if prev.tokens <= budget {
            return Some(prev.clone());
        }
        if budget <= MIN_PARTIAL_OVERLAP_TOKENS {
            return None;
        }

        let spans = self.counter.token_spans(slice(text, &prev.range));
        let first = spans.get(spans.len().checked_sub(budget)?)?;
        Some(Piece {
            range: prev.range.start + first.start..prev.range.end,
            tokens: budget,
        })
    }

    /// Cut an oversized piece into consecutive pieces of at most `limit`
    /// tokens. The pieces tile the original range.
    fn cut_on_tokens(&self, text: &str, piece: &Piece, limit: usize) -> Vec<Piece> {
        let spans = self.counter.token_spans(slice(text, &piece.range));
        let limit = limit.max(1);
        let groups: Vec<&[Range<usize>]> = spans.chunks(limit).collect();

        let mut parts = Vec::with_capacity(groups.len());
        let mut start = piece.range.start;
        for (i, group) in groups.iter().enumerate() {
            let end = match groups.get(i + 1).and_then(|next| next.first()) {
                Some(next_token) => piece.range.start + next_token.start,
                None => piece.range.end,
            };
            parts.push(Piece {
                range: start..end,
                tokens: group.len(),
            });
            start = end;
        }
        parts
    }

    fn finish(&self, text: &str, open: OpenChunk) -> Chunk {
        let chunk_text = slice(text, &(open.start..open.end));
        let token_length = self.counter.count(chunk_text);
        trace!("Closed chunk of {token_length} tokens ({} bytes)", chunk_text.len());
        Chunk {
            text: chunk_text.to_string(),
            token_length,
            overlap_len: open.body_start - open.start,
        }
    }
}

/// Sentence ranges that tile `text` from start to end.
pub fn sentence_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for m in SENTENCE_BREAK.find_iter(text) {
        if m.end() > start {
            ranges.push(start..m.end());
            start = m.end();
        }
    }
    if start < text.len() {
        ranges.push(start..text.len());
    }
    ranges
}

fn slice<'a>(text: &'a str, range: &Range<usize>) -> &'a str {
    text.get(range.clone()).unwrap_or_default()
}
