//! Extraction of the context and summary regions from raw model output.
//!
//! Models are asked to answer with `<context>…</context>` and `<summary>…</summary>`. Output is
//! parsed with an explicit ladder:
//!
//! 1. Direct tags: the first well-formed `<summary>` block (plus `<context>` when present).
//! 2. Result wrapper: inside `<result>…</result>`, the context block is taken when present and
//!    the summary is the remaining body.
//! 3. Raw text: the whole response becomes the summary and no context is reported.
//!
//! Missing tags never produce an error.

/// Which rung of the ladder produced a [`ParsedResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPath {
    /// Top-level `<summary>` tags were found.
    DirectTags,
    /// Content came from inside a `<result>` wrapper.
    ResultWrapper,
    /// No usable tags; the raw response is the summary.
    RawText,
}

/// Regions extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse<'a> {
    /// Body of the context block, if one was found.
    pub context: Option<&'a str>,
    /// Summary text.
    pub summary: &'a str,
    /// Ladder rung that matched.
    pub path: ExtractionPath,
}

/// Parse a raw model response.
pub fn parse_response(raw: &str) -> ParsedResponse<'_> {
    if let Some(summary) = find_tag(raw, "summary") {
        return ParsedResponse {
            context: find_tag(raw, "context"),
            summary: summary.trim(),
            path: ExtractionPath::DirectTags,
        };
    }

    if let Some(body) = find_tag(raw, "result") {
        let context = find_tag(body, "context");
        let summary = match context {
            Some(_) => outside_tag(body, "context"),
            None => body,
        };
        return ParsedResponse {
            context,
            summary: summary.trim(),
            path: ExtractionPath::ResultWrapper,
        };
    }

    ParsedResponse {
        context: None,
        summary: raw.trim(),
        path: ExtractionPath::RawText,
    }
}

/// Body of the first `<tag>…</tag>` pair, if the closing tag follows the opening one.
fn find_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

/// The portion of `text` after the first complete `<tag>…</tag>` block, or before it when
/// nothing follows.
fn outside_tag<'a>(text: &'a str, tag: &str) -> &'a str {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(open_at) = text.find(&open) else {
        return text;
    };
    let Some(close_at) = text[open_at..].find(&close).map(|offset| offset + open_at) else {
        return text;
    };
    let after = &text[close_at + close.len()..];
    if after.trim().is_empty() {
        &text[..open_at]
    } else {
        after
    }
}
