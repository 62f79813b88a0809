//! Text-extraction collaborator.
//!
//! A [`TextExtractor`] opens an uploaded document and hands back a [`PageSource`] that yields
//! text page by page. Opening can fail (the document is unreadable); extracting a page cannot.
//! Pages that fail to extract come back empty so the pipeline can record and skip them.

use async_trait::async_trait;
use lopdf::Document;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while preparing a document for extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document could not be parsed.
    #[error("Failed to open document: {0}")]
    Open(String),
    /// The blocking extraction task was aborted.
    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Opens documents for page-by-page extraction.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Load the document at `path`.
    async fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, ExtractionError>;
}

/// An opened document whose pages can be extracted individually.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Extract the text of the 0-indexed page. Returns an empty string on failure.
    async fn extract_page(&self, index: usize) -> String;
}

/// PDF extractor backed by `lopdf` that reads the embedded text layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    /// Create a new extractor.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn open(&self, path: &Path) -> Result<Box<dyn PageSource>, ExtractionError> {
        let path = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || Document::load(&path))
            .await
            .map_err(|error| ExtractionError::Task(error.to_string()))?
            .map_err(|error| ExtractionError::Open(error.to_string()))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        tracing::debug!(pages = page_numbers.len(), "Opened PDF document");
        Ok(Box::new(PdfPages {
            document: Arc::new(document),
            page_numbers,
        }))
    }
}

struct PdfPages {
    document: Arc<Document>,
    page_numbers: Vec<u32>,
}

#[async_trait]
impl PageSource for PdfPages {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    async fn extract_page(&self, index: usize) -> String {
        let Some(&page_number) = self.page_numbers.get(index) else {
            tracing::warn!(page = index + 1, "Requested page is out of range");
            return String::new();
        };

        let document = Arc::clone(&self.document);
        let extracted =
            tokio::task::spawn_blocking(move || document.extract_text(&[page_number])).await;

        match extracted {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(error)) => {
                tracing::warn!(page = index + 1, error = %error, "Page text extraction failed");
                String::new()
            }
            Err(error) => {
                tracing::warn!(page = index + 1, error = %error, "Page extraction task aborted");
                String::new()
            }
        }
    }
}
