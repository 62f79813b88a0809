//! Token counting with a whitespace fallback.
//!
//! The primary path resolves a `tiktoken-rs` encoding by name (`cl100k_base`, `o200k_base`, ...)
//! or by model (`gpt-4o`, ...). When neither resolves, the counter degrades to counting
//! whitespace-separated words and logs a warning. Callers see the same contract either way.

use anyhow::Error as TokenizerError;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

type CountFn = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Estimates the token cost of text spans.
#[derive(Clone)]
pub struct TokenCounter {
    count: CountFn,
    strategy: CountingStrategy,
}

/// Which counting path a [`TokenCounter`] ended up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountingStrategy {
    /// BPE encoding resolved from the configured name.
    Encoding(String),
    /// Whitespace-separated word approximation.
    Whitespace,
}

impl TokenCounter {
    /// Build a counter for `encoding`, falling back to whitespace counting when it is unknown.
    pub fn for_encoding(encoding: &str) -> Self {
        let name = encoding.trim();
        match resolve_encoding(name) {
            Ok(bpe) => {
                let bpe = Arc::new(bpe);
                Self {
                    count: Arc::new(move |segment: &str| bpe.encode_ordinary(segment).len()),
                    strategy: CountingStrategy::Encoding(name.to_string()),
                }
            }
            Err(error) => {
                tracing::warn!(
                    encoding = name,
                    error = %error,
                    "Tokenizer unavailable; falling back to whitespace counter"
                );
                Self::whitespace()
            }
        }
    }

    /// Counter that approximates tokens as whitespace-separated words.
    pub fn whitespace() -> Self {
        Self {
            count: Arc::new(|segment: &str| segment.split_whitespace().count()),
            strategy: CountingStrategy::Whitespace,
        }
    }

    /// Estimate the token cost of `text`.
    pub fn count(&self, text: &str) -> usize {
        (self.count)(text)
    }

    /// Counting path in use.
    pub fn strategy(&self) -> &CountingStrategy {
        &self.strategy
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn resolve_encoding(name: &str) -> Result<CoreBPE, TokenizerError> {
    if let Some(candidate) = encoding_from_name(name) {
        return candidate;
    }
    get_bpe_from_model(name)
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}
