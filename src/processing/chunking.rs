//! Token-bounded, paragraph-preserving chunking.
//!
//! Text is split into paragraphs on blank lines and packed greedily into chunks that stay within
//! the token budget. A paragraph that alone exceeds the budget is split on sentence boundaries
//! and its sentences are packed the same way. Packing separators are `"\n\n"` between paragraphs
//! and `" "` between sentences of one paragraph.
//!
//! - A chunk boundary is only inserted when the next unit would overflow a non-empty chunk, so no
//!   chunk is ever empty.
//! - A single sentence larger than the budget becomes its own oversized chunk instead of being
//!   dropped.
//! - Chunk order follows input order; the resulting indices are used by every later stage.

use super::tokens::TokenCounter;
use super::types::{Chunk, ChunkingError};

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const SENTENCE_SEPARATOR: &str = " ";

/// Splits document text into token-bounded [`Chunk`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    counter: TokenCounter,
    max_tokens: usize,
}

impl Chunker {
    /// Create a chunker with the given token budget.
    pub fn new(counter: TokenCounter, max_tokens: usize) -> Result<Self, ChunkingError> {
        if max_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            counter,
            max_tokens,
        })
    }

    /// Token budget per chunk.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` into ordered chunks. Blank input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut packer = Packer::new(self);

        for paragraph in paragraphs(text) {
            if self.counter.count(&paragraph) <= self.max_tokens {
                packer.push(&paragraph, PARAGRAPH_SEPARATOR);
                continue;
            }

            for (position, sentence) in sentences(&paragraph).into_iter().enumerate() {
                let separator = if position == 0 {
                    PARAGRAPH_SEPARATOR
                } else {
                    SENTENCE_SEPARATOR
                };
                packer.push(sentence, separator);
            }
        }

        let texts = packer.finish();
        let total = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                total,
                token_count: self.counter.count(&text),
                text,
            })
            .collect()
    }
}

struct Packer<'a> {
    chunker: &'a Chunker,
    chunks: Vec<String>,
    current: String,
}

impl<'a> Packer<'a> {
    fn new(chunker: &'a Chunker) -> Self {
        Self {
            chunker,
            chunks: Vec::new(),
            current: String::new(),
        }
    }

    fn push(&mut self, unit: &str, separator: &str) {
        if self.current.is_empty() {
            self.current.push_str(unit);
            return;
        }

        let mut candidate =
            String::with_capacity(self.current.len() + separator.len() + unit.len());
        candidate.push_str(&self.current);
        candidate.push_str(separator);
        candidate.push_str(unit);

        if self.chunker.counter.count(&candidate) > self.chunker.max_tokens {
            let full = std::mem::replace(&mut self.current, unit.to_string());
            self.chunks.push(full);
        } else {
            self.current = candidate;
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() {
            self.chunks.push(self.current);
        }
        self.chunks
    }
}

/// Split text into paragraphs separated by one or more blank lines.
fn paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(lines.join("\n"));
                lines.clear();
            }
        } else {
            lines.push(line.trim_end());
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join("\n"));
    }

    paragraphs
}

/// Split a paragraph after `.`, `!` or `?` when followed by whitespace.
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next, following)) = chars.peek() {
            if following.is_whitespace() {
                let sentence = paragraph[start..next].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = next;
            }
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
