//! Prompt construction for chunk summarization.

use super::context::SummaryContext;
use super::types::Chunk;
use crate::generation::ChatMessage;
use std::path::Path;

const DEFAULT_TEMPLATE: &str = "Summarize section {position} of {total} of a longer document. \
Keep the facts, figures and names that matter, and continue the narrative established by the \
previous context.\n\nPrevious context:\n{context}\n\nText to analyze:\n{chunk}";

const FORMAT_INSTRUCTIONS: &str = "You summarize documents one section at a time. Always answer \
with exactly two blocks and nothing else:\n<context>{JSON object with fields \"title\", \
\"heading\", \"concepts\" (array of strings), \"depth\" (integer), \"pending_sections\" (array of \
strings)}</context>\n<summary>Markdown summary of this section</summary>";

/// User-editable template rendered once per chunk.
///
/// Supported placeholders: `{chunk}`, `{position}` (1-based), `{total}`, `{context}`. A template
/// without `{chunk}` gets the chunk text appended after a `Text to analyze:` label.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Wrap an explicit template string.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Load a template from disk, falling back to the built-in one when the file is unusable.
    pub async fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if !contents.trim().is_empty() => Self::new(contents.trim()),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Prompt template is empty; using default prompt");
                Self::default()
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "Prompt template unreadable; using default prompt"
                );
                Self::default()
            }
        }
    }

    /// Render the user prompt for one chunk.
    pub fn render(&self, chunk: &Chunk, context: &SummaryContext) -> String {
        let rendered = self
            .template
            .replace("{position}", &(chunk.index + 1).to_string())
            .replace("{total}", &chunk.total.to_string())
            .replace("{context}", &context.to_prompt_json());

        if rendered.contains("{chunk}") {
            rendered.replace("{chunk}", &chunk.text)
        } else {
            format!("{rendered}\n\nText to analyze:\n{}", chunk.text)
        }
    }

    /// Build the full conversation sent to the generation backend.
    pub fn messages(&self, chunk: &Chunk, context: &SummaryContext) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(FORMAT_INSTRUCTIONS),
            ChatMessage::user(self.render(chunk, context)),
        ]
    }
}
