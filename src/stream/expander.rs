//! Expansion of the atomic final-answer record into an incremental reveal.
//!
//! The upstream delivers the whole answer at once. The expander turns it
//! into `ThoughtProcessUpdate`, a run of `TextChunk`s, one `FinalAnswer` and,
//! when sources exist, one `Citations` event. The sequence is deterministic
//! for a given payload and always ends with a `FinalAnswer`.

use std::time::Duration;

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;

use crate::normalized::{CanonicalEvent, WebResult};
use crate::source::{MAX_CITATIONS, Source};

/// Words per `TextChunk`.
pub const WORDS_PER_CHUNK: usize = 2;

/// Answer used when the final payload carries no readable answer text.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I couldn't read the answer for this question. Please try again.";

/// Answer text and sources recovered from a final record.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalPayload {
    /// Complete answer text.
    pub answer: String,
    /// Normalized citation sources.
    pub sources: Vec<Source>,
}

/// The nested `{ answer, web_results }` document.
#[derive(Deserialize)]
struct AnswerDocument {
    answer: String,
    #[serde(default)]
    web_results: Vec<WebResult>,
}

fn results_in(body: &Value, key: &str) -> Vec<WebResult> {
    body.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<WebResult>>(v).ok())
        .unwrap_or_default()
}

fn to_sources(results: &[WebResult]) -> Vec<Source> {
    results
        .iter()
        .filter_map(WebResult::to_source)
        .take(MAX_CITATIONS)
        .collect()
}

/// Recover the answer text and sources from a final record body.
///
/// Accepted layouts, in order:
/// 1. `answer` is a JSON string encoding `{ answer, web_results }`
/// 2. `answer` is the plain answer text, `web_results` is a sibling
/// 3. `text` is the plain answer text, with `sources` or `web_results` as a sibling
///
/// Returns `None` when no non-blank answer text can be found.
pub fn parse_final(body: &Value) -> Option<FinalPayload> {
    if let Some(answer) = body.get("answer").and_then(Value::as_str) {
        if let Ok(doc) = serde_json::from_str::<AnswerDocument>(answer) {
            return (!doc.answer.trim().is_empty()).then(|| FinalPayload {
                answer: doc.answer,
                sources: to_sources(&doc.web_results),
            });
        }

        if answer.trim().is_empty() {
            return None;
        }
        return Some(FinalPayload {
            answer: answer.to_string(),
            sources: to_sources(&results_in(body, "web_results")),
        });
    }

    let text = body.get("text").and_then(Value::as_str)?;
    if text.trim().is_empty() {
        return None;
    }

    let mut sources: Vec<Source> = body
        .get("sources")
        .cloned()
        .and_then(|v| serde_json::from_value::<Vec<Source>>(v).ok())
        .unwrap_or_default()
        .into_iter()
        .map(Source::normalized)
        .take(MAX_CITATIONS)
        .collect();
    if sources.is_empty() {
        sources = to_sources(&results_in(body, "web_results"));
    }

    Some(FinalPayload {
        answer: text.to_string(),
        sources,
    })
}

/// Split `text` on whitespace and regroup into chunks of `group` words.
///
/// Each chunk keeps a trailing space, in original word order.
pub fn chunk_words(text: &str, group: usize) -> Vec<String> {
    let group = group.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(group)
        .map(|ws| {
            let mut chunk = ws.join(" ");
            chunk.push(' ');
            chunk
        })
        .collect()
}

/// Expand a final record body into its ordered event sequence.
pub fn expand(body: &Value) -> Vec<CanonicalEvent> {
    let Some(payload) = parse_final(body) else {
        tracing::warn!(
            name: "final.parse_failed",
            "Final record has no readable answer; using fallback"
        );
        return vec![CanonicalEvent::FinalAnswer {
            text: FALLBACK_ANSWER.to_string(),
        }];
    };

    let mut events = Vec::new();
    events.push(CanonicalEvent::ThoughtProcessUpdate);
    events.extend(
        chunk_words(&payload.answer, WORDS_PER_CHUNK)
            .into_iter()
            .map(|text| CanonicalEvent::TextChunk { text }),
    );
    events.push(CanonicalEvent::FinalAnswer {
        text: payload.answer,
    });
    if !payload.sources.is_empty() {
        events.push(CanonicalEvent::Citations {
            sources: payload.sources,
        });
    }

    tracing::debug!(name: "final.expanded", events = events.len(), "Final record expanded");
    events
}

/// Lazily expand a final record, pausing `delay` before every event but the first.
///
/// A zero delay never touches the timer. Dropping the stream cancels any
/// pending pause.
pub fn expand_paced(body: Value, delay: Duration) -> impl Stream<Item = CanonicalEvent> + Send {
    async_stream::stream! {
        for (idx, event) in expand(&body).into_iter().enumerate() {
            if idx > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield event;
        }
    }
}
