//! Canonical event types for the answer pipeline.
//!
//! This module defines the single event taxonomy that every upstream wire
//! shape is normalized into, and the SSE encoding used to republish those
//! events to the UI.
//!
//! # Event Types
//!
//! The [`CanonicalEvent`] enum covers every protocol occurrence of a turn:
//! - Search lifecycle (initial query, web search, results, crawled URLs)
//! - Analysis marker (thought process update)
//! - Answer delivery (text chunks, the final answer, citations)
//!
//! # Example
//!
//! ```rust
//! use answer_stream::normalized::{CanonicalEvent, sse_event};
//!
//! let event = CanonicalEvent::TextChunk {
//!     text: "Hello ".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("answer.delta"));
//! ```

use serde::{Deserialize, Serialize};

use crate::source::Source;

/// One query issued to a search engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    /// Engine name, e.g. `web`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Query text.
    #[serde(default)]
    pub query: String,
    /// Requested result count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// One search hit as reported by the upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebResult {
    /// Result title. Legacy producers call this `name`.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Result URL.
    #[serde(default)]
    pub url: String,
    /// Optional snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl WebResult {
    /// Convert into a citation [`Source`], or `None` when the result has no URL.
    pub fn to_source(&self) -> Option<Source> {
        let url = self.url.trim();
        if url.is_empty() {
            return None;
        }

        let title = non_blank(self.title.as_deref())
            .or_else(|| non_blank(self.snippet.as_deref()))
            .unwrap_or("Source");

        Some(Source::new(title, url, self.snippet.clone(), None))
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Normalized events folded into a conversation turn.
///
/// Each variant carries only the fields relevant to its kind. The serialized
/// form is the canonical wire shape `{ "type": ..., "payload": { ... } }`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────
    /// The question was accepted by the upstream.
    InitialQuery {
        /// The question as the upstream understood it.
        query: String,
    },

    /// The upstream started searching.
    SearchWeb {
        /// Queries sent to search engines (may be empty).
        queries: Vec<SearchQuery>,
    },

    /// Search results are available.
    SearchResults {
        /// Result list.
        web_results: Vec<WebResult>,
    },

    /// A single URL is being crawled.
    UrlCrawlUpdate {
        /// The crawled URL.
        url: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Answer
    // ─────────────────────────────────────────────────────────────────────
    /// Analysis started. Pure phase signal.
    ThoughtProcessUpdate,

    /// Incremental answer text.
    TextChunk {
        /// The text fragment to append.
        text: String,
    },

    /// The complete answer. Terminates a well-formed stream.
    FinalAnswer {
        /// Authoritative answer text.
        text: String,
    },

    /// Sources backing the final answer.
    Citations {
        /// Normalized sources.
        sources: Vec<Source>,
    },
}

impl CanonicalEvent {
    /// Wire discriminator of this event (`INITIAL_QUERY`, `TEXT_CHUNK`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialQuery { .. } => "INITIAL_QUERY",
            Self::SearchWeb { .. } => "SEARCH_WEB",
            Self::SearchResults { .. } => "SEARCH_RESULTS",
            Self::UrlCrawlUpdate { .. } => "URL_CRAWL_UPDATE",
            Self::ThoughtProcessUpdate => "THOUGHT_PROCESS_UPDATE",
            Self::TextChunk { .. } => "TEXT_CHUNK",
            Self::FinalAnswer { .. } => "FINAL_ANSWER",
            Self::Citations { .. } => "CITATIONS",
        }
    }

    /// Whether this event ends a well-formed stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. })
    }
}

/// Convert a [`CanonicalEvent`] to an SSE-formatted string.
///
/// The output carries an `event:` line (for `EventSource` listeners) and a
/// `data:` line containing the canonical JSON shape.
///
/// # Example
///
/// ```rust
/// use answer_stream::normalized::{CanonicalEvent, sse_event};
///
/// let sse = sse_event(&CanonicalEvent::ThoughtProcessUpdate);
/// assert!(sse.starts_with("event: thought.update\n"));
/// ```
pub fn sse_event(evt: &CanonicalEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "ERROR", "payload": { "message": e.to_string() } }).to_string()
    });

    sse_frame(event_name(evt), &json)
}

/// Format a named SSE frame around an already-encoded JSON payload.
pub fn sse_frame(event_name: &str, json: &str) -> String {
    format!("event: {event_name}\ndata: {json}\n\n")
}

/// Get the SSE event name for a [`CanonicalEvent`].
pub fn event_name(evt: &CanonicalEvent) -> &'static str {
    match evt {
        CanonicalEvent::InitialQuery { .. } => "query.initial",
        CanonicalEvent::SearchWeb { .. } => "search.web",
        CanonicalEvent::SearchResults { .. } => "search.results",
        CanonicalEvent::UrlCrawlUpdate { .. } => "crawl.url",
        CanonicalEvent::ThoughtProcessUpdate => "thought.update",
        CanonicalEvent::TextChunk { .. } => "answer.delta",
        CanonicalEvent::FinalAnswer { .. } => "answer.final",
        CanonicalEvent::Citations { .. } => "answer.citations",
    }
}
