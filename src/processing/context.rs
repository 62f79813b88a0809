//! Structured state carried from one chunk's summary to the next.

use serde::{Deserialize, Serialize};

/// Maximum number of concepts kept in the carried context.
pub const MAX_CONCEPTS: usize = 40;

/// Narrative state threaded through the chunk sequence.
///
/// The model receives the previous context as JSON and returns an updated one. Parsing never
/// fails the pipeline: an unreadable block leaves the previous context in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryContext {
    /// Document title, once known.
    pub title: Option<String>,
    /// Heading of the section currently being summarized.
    pub heading: Option<String>,
    /// Key concepts introduced so far, oldest first.
    pub concepts: Vec<String>,
    /// Heading nesting depth at the end of the last chunk.
    pub depth: u32,
    /// Sections opened but not yet finished.
    pub pending_sections: Vec<String>,
}

impl SummaryContext {
    /// Serialize for inclusion in a prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a context block produced by the model, or return `None` when it is unusable.
    ///
    /// Surrounding code fences (```` ```json ````) are tolerated. The parsed context is
    /// normalized so the concept list stays bounded.
    pub fn parse(block: &str) -> Option<Self> {
        let body = strip_code_fence(block.trim());
        if body.is_empty() {
            return None;
        }
        match serde_json::from_str::<Self>(body) {
            Ok(context) => Some(context.normalized()),
            Err(error) => {
                tracing::debug!(error = %error, "Context block is not valid JSON");
                None
            }
        }
    }

    /// Merge a freshly parsed block over `previous`, keeping `previous` when parsing fails.
    pub fn update_from(previous: &Self, block: Option<&str>) -> Self {
        match block.and_then(Self::parse) {
            Some(context) => context,
            None => {
                if block.is_some() {
                    tracing::warn!("Malformed context block; carrying previous context forward");
                }
                previous.clone()
            }
        }
    }

    fn normalized(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut concepts: Vec<String> = Vec::with_capacity(self.concepts.len());
        for concept in self.concepts.into_iter().rev() {
            let trimmed = concept.trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_lowercase()) {
                continue;
            }
            concepts.push(trimmed.to_string());
            if concepts.len() == MAX_CONCEPTS {
                break;
            }
        }
        concepts.reverse();
        self.concepts = concepts;
        self
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
