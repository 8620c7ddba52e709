//! Mapping of raw records onto [`CanonicalEvent`]s.
//!
//! Two payload shapes exist for the same logical event:
//!
//! - legacy: `{ "step_type": "SEARCH_RESULTS", "content": { ... }, "uuid": "..." }`
//! - canonical: `{ "type": "SEARCH_RESULTS", "payload": { ... } }`
//!
//! Both are accepted and produce identical events. Unrecognized shapes and
//! invalid JSON are logged and dropped.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::normalized::{CanonicalEvent, SearchQuery, WebResult};
use crate::source::Source;

use super::frame::RawRecord;

/// Result of normalizing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A fully translated event.
    Event(CanonicalEvent),
    /// The "answer is fully known" record, passed through untranslated.
    ///
    /// Holds the record body (`content` or `payload`) for the expander.
    FinalStep(Value),
}

/// Discriminators understood by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    InitialQuery,
    SearchWeb,
    SearchResults,
    UrlCrawlUpdate,
    ThoughtProcessUpdate,
    TextChunk,
    Final,
    Citations,
}

impl Kind {
    fn parse(discriminator: &str) -> Option<Self> {
        let d = discriminator.trim().to_ascii_uppercase();
        let kind = match d.as_str() {
            "INITIAL_QUERY" => Self::InitialQuery,
            "SEARCH_WEB" => Self::SearchWeb,
            "SEARCH_RESULTS" => Self::SearchResults,
            "URL_CRAWL_UPDATE" => Self::UrlCrawlUpdate,
            "THOUGHT_PROCESS_UPDATE" => Self::ThoughtProcessUpdate,
            "TEXT_CHUNK" => Self::TextChunk,
            "FINAL" | "FINAL_ANSWER" => Self::Final,
            "CITATIONS" => Self::Citations,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Deserialize)]
struct InitialQueryBody {
    #[serde(default)]
    query: String,
}

#[derive(Deserialize)]
struct SearchWebBody {
    #[serde(default)]
    queries: Vec<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchResultsBody {
    #[serde(default)]
    web_results: Vec<WebResult>,
}

#[derive(Deserialize)]
struct UrlBody {
    url: String,
}

#[derive(Deserialize)]
struct TextBody {
    #[serde(alias = "content")]
    text: String,
}

#[derive(Deserialize)]
struct CitationsBody {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Split a JSON object into `(discriminator, body)` for either known shape.
fn split_shape(value: &Value) -> Option<(&str, Value)> {
    let obj = value.as_object()?;

    if let Some(kind) = obj.get("step_type").and_then(Value::as_str) {
        let body = obj.get("content").cloned().unwrap_or(Value::Null);
        return Some((kind, body));
    }
    if let Some(kind) = obj.get("type").and_then(Value::as_str) {
        let body = obj.get("payload").cloned().unwrap_or(Value::Null);
        return Some((kind, body));
    }
    None
}

fn body_as<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
    // A missing body is treated as an empty object so defaulted fields apply.
    let body = if body.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        body
    };
    serde_json::from_value(body)
}

fn translate(kind: Kind, body: Value) -> Result<Normalized, serde_json::Error> {
    let event = match kind {
        Kind::InitialQuery => {
            let b: InitialQueryBody = body_as(body)?;
            CanonicalEvent::InitialQuery { query: b.query }
        }
        Kind::SearchWeb => {
            let b: SearchWebBody = body_as(body)?;
            CanonicalEvent::SearchWeb { queries: b.queries }
        }
        Kind::SearchResults => {
            let b: SearchResultsBody = body_as(body)?;
            CanonicalEvent::SearchResults {
                web_results: b.web_results,
            }
        }
        Kind::UrlCrawlUpdate => {
            let b: UrlBody = body_as(body)?;
            CanonicalEvent::UrlCrawlUpdate { url: b.url }
        }
        Kind::ThoughtProcessUpdate => CanonicalEvent::ThoughtProcessUpdate,
        Kind::TextChunk => {
            let b: TextBody = body_as(body)?;
            CanonicalEvent::TextChunk { text: b.text }
        }
        Kind::Citations => {
            let b: CitationsBody = body_as(body)?;
            CanonicalEvent::Citations {
                sources: b.sources.into_iter().map(Source::normalized).collect(),
            }
        }
        Kind::Final => return Ok(Normalized::FinalStep(body)),
    };
    Ok(Normalized::Event(event))
}

/// Normalize one raw record.
///
/// Returns `None` when the record is not valid JSON, has an unknown shape or
/// discriminator, or its body does not fit the discriminated kind.
pub fn normalize(record: &RawRecord) -> Option<Normalized> {
    let value: Value = match serde_json::from_str(&record.data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                name: "record.parse_failed",
                error = %e,
                data = %record.data,
                "Dropping record with invalid JSON"
            );
            return None;
        }
    };

    let Some((discriminator, body)) = split_shape(&value) else {
        tracing::warn!(
            name: "record.unknown_shape",
            data = %record.data,
            "Dropping record with unrecognized shape"
        );
        return None;
    };

    let Some(kind) = Kind::parse(discriminator) else {
        tracing::warn!(
            name: "record.unknown_kind",
            kind = %discriminator,
            "Dropping record with unknown discriminator"
        );
        return None;
    };

    match translate(kind, body) {
        Ok(normalized) => {
            tracing::trace!(name: "record.normalized", kind = %discriminator, "Record normalized");
            Some(normalized)
        }
        Err(e) => {
            tracing::warn!(
                name: "record.invalid_body",
                kind = %discriminator,
                error = %e,
                "Dropping record whose body does not match its kind"
            );
            None
        }
    }
}
