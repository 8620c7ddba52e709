//! End-to-end tests: raw wire bytes → canonical events → turn state.

use std::time::Duration;

use answer_stream::Error;
use answer_stream::conversation::{
    FAILURE_MESSAGE, Phase, StepId, StepStatus, TurnOutcome, TurnReducer, TurnRun, TurnState,
};
use answer_stream::normalized::CanonicalEvent;
use answer_stream::stream::{FALLBACK_ANSWER, canonical_events};
use answer_stream::upstream::{MockProducer, Upstream, start_turn};
use futures::{StreamExt, stream};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn wire(records: &[Value]) -> String {
    records.iter().map(|r| format!("data: {r}\n\n")).collect()
}

/// Split `text` into chunks of `size` bytes, ignoring UTF-8 boundaries.
fn chunked(text: &str, size: usize) -> Vec<Result<Vec<u8>, Error>> {
    text.as_bytes().chunks(size).map(|c| Ok(c.to_vec())).collect()
}

async fn run_chunks(chunks: Vec<Result<Vec<u8>, Error>>) -> (Vec<CanonicalEvent>, TurnState) {
    let events = canonical_events(stream::iter(chunks), Duration::ZERO).boxed();
    let mut run = TurnRun::new(TurnReducer::new("q"), events, CancellationToken::new());

    let mut seen = Vec::new();
    while let Some(update) = run.next().await {
        if let answer_stream::conversation::TurnUpdate::Applied { event, .. } = update {
            seen.push(event);
        }
    }
    (seen, run.into_outcome().state().clone())
}

fn happy_wire() -> String {
    let nested = json!({
        "answer": "Rust is a systems language",
        "web_results": [
            { "title": "Rust", "url": "https://www.rust-lang.org", "snippet": "Official site" },
            { "name": "Docs", "url": "https://doc.rust-lang.org/book" }
        ]
    });
    wire(&[
        json!({ "step_type": "INITIAL_QUERY", "content": { "query": "What is Rust?" } }),
        json!({ "step_type": "SEARCH_WEB", "content": { "queries": [{ "engine": "web", "query": "rust" }] } }),
        json!({ "step_type": "SEARCH_RESULTS", "content": { "web_results": [
            { "name": "Rust", "url": "https://www.rust-lang.org" }
        ] } }),
        json!({ "step_type": "URL_CRAWL_UPDATE", "content": { "url": "https://doc.rust-lang.org/book" } }),
        json!({ "step_type": "FINAL", "content": { "answer": nested.to_string() } }),
    ]) + "data: [DONE]\n\n"
}

#[tokio::test]
async fn test_happy_path_reaches_done() {
    let (events, state) = run_chunks(chunked(&happy_wire(), 4096)).await;

    assert!(matches!(events.first(), Some(CanonicalEvent::InitialQuery { .. })));
    assert!(matches!(events.last(), Some(CanonicalEvent::Citations { .. })));

    assert_eq!(state.phase, Some(Phase::Done));
    assert!(state.terminal);
    assert!(!state.is_failed());
    assert_eq!(state.accumulated_text, "Rust is a systems language");
    assert_eq!(state.urls, vec!["rust-lang.org", "https://doc.rust-lang.org/book"]);
    assert_eq!(state.sources.len(), 2);
    assert_eq!(state.sources[1].title, "Docs");
    for id in StepId::ALL {
        assert_eq!(state.step_status(id), StepStatus::Completed);
    }
}

#[tokio::test]
async fn test_fragmentation_does_not_change_result() {
    let text = happy_wire();
    let (whole_events, whole) = run_chunks(chunked(&text, text.len())).await;

    for size in [1, 2, 3, 7, 64] {
        let (events, state) = run_chunks(chunked(&text, size)).await;
        assert_eq!(events, whole_events, "chunk size {size}");
        assert_eq!(state.accumulated_text, whole.accumulated_text);
        assert_eq!(state.urls, whole.urls);
        assert_eq!(state.sources, whole.sources);
    }
}

#[tokio::test]
async fn test_crlf_framing_and_multibyte_split() {
    let record = json!({ "step_type": "FINAL", "content": { "answer": "café über naïve" } });
    let text = format!("data: {record}\r\n\r\ndata: [DONE]\r\n\r\n");

    let (_, state) = run_chunks(chunked(&text, 1)).await;
    assert_eq!(state.accumulated_text, "café über naïve");
    assert_eq!(state.phase, Some(Phase::Done));
}

#[tokio::test]
async fn test_canonical_shape_matches_legacy_shape() {
    let legacy = wire(&[
        json!({ "step_type": "INITIAL_QUERY", "content": { "query": "q" } }),
        json!({ "step_type": "FINAL", "content": { "answer": "same answer" } }),
    ]);
    let canonical = wire(&[
        json!({ "type": "INITIAL_QUERY", "payload": { "query": "q" } }),
        json!({ "type": "FINAL_ANSWER", "payload": { "text": "same answer" } }),
    ]);

    let (a, _) = run_chunks(chunked(&legacy, 4096)).await;
    let (b, _) = run_chunks(chunked(&canonical, 4096)).await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let text = String::from("data: {not json\n\n")
        + &wire(&[
            json!({ "error": "Failed to process request" }),
            json!({ "step_type": "MYSTERY", "content": {} }),
            json!({ "step_type": "FINAL", "content": { "answer": "still fine" } }),
        ]);

    let (_, state) = run_chunks(chunked(&text, 16)).await;
    assert_eq!(state.accumulated_text, "still fine");
    assert!(!state.is_failed());
}

#[tokio::test]
async fn test_unreadable_final_uses_fallback() {
    let text = wire(&[json!({ "step_type": "FINAL", "content": { "answer": "   " } })]);

    let (events, state) = run_chunks(chunked(&text, 4096)).await;
    assert_eq!(
        events,
        vec![CanonicalEvent::FinalAnswer {
            text: FALLBACK_ANSWER.to_string()
        }]
    );
    assert_eq!(state.accumulated_text, FALLBACK_ANSWER);
    assert!(state.terminal);
}

#[tokio::test]
async fn test_abrupt_end_fails_turn() {
    let text = wire(&[
        json!({ "step_type": "INITIAL_QUERY", "content": { "query": "q" } }),
        json!({ "step_type": "SEARCH_WEB", "content": { "queries": [] } }),
    ]) + "data: {\"step_type\": \"FIN";

    let (_, state) = run_chunks(chunked(&text, 8)).await;
    assert!(state.terminal);
    assert!(state.is_failed());
    assert_eq!(state.phase, None);
    assert_eq!(state.accumulated_text, FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_transport_error_fails_turn() {
    let mut chunks = chunked(
        &wire(&[json!({ "step_type": "INITIAL_QUERY", "content": { "query": "q" } })]),
        4096,
    );
    chunks.push(Err(Error::Transport("connection reset".to_string())));

    let (_, state) = run_chunks(chunks).await;
    assert!(state.is_failed());
    assert_eq!(state.accumulated_text, FAILURE_MESSAGE);
    assert_eq!(state.error.as_deref(), Some("Transport error: connection reset"));
}

#[tokio::test]
async fn test_bytes_after_done_are_ignored() {
    let text = wire(&[json!({ "step_type": "FINAL", "content": { "answer": "kept" } })])
        + "data: [DONE]\n\n"
        + &wire(&[json!({ "step_type": "FINAL", "content": { "answer": "ignored" } })]);

    let (_, state) = run_chunks(chunked(&text, 4096)).await;
    assert_eq!(state.accumulated_text, "kept");
}

#[tokio::test]
async fn test_mock_producer_through_pipeline() {
    let producer = MockProducer::new(Duration::ZERO);
    let run = start_turn(
        &producer,
        TurnReducer::new("What is the best programming language?"),
        Duration::ZERO,
        CancellationToken::new(),
    )
    .await;

    let TurnOutcome::Finished(state) = run.run_to_end().await else {
        panic!("expected finished turn");
    };
    assert_eq!(state.phase, Some(Phase::Done));
    assert!(state.accumulated_text.contains("JavaScript"));
    // Four result hosts, then the four crawled URLs.
    assert_eq!(state.urls.len(), 8);
    assert!(state.urls.contains(&"stackoverflow.com".to_string()));
    assert!(state.urls.contains(&"https://stackoverflow.com".to_string()));
    assert_eq!(state.sources.len(), 4);
    assert!(state.sources.iter().all(|s| s.favicon.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_reveal_leaves_state_untouched() {
    let producer = MockProducer::new(Duration::from_millis(300));
    let cancel = CancellationToken::new();
    let mut run = start_turn(
        &producer,
        TurnReducer::new("Explain blockchain"),
        Duration::from_millis(40),
        cancel.clone(),
    )
    .await;

    // Pull until the answer starts streaming.
    loop {
        match run.next().await {
            Some(answer_stream::conversation::TurnUpdate::Applied {
                event: CanonicalEvent::TextChunk { .. },
                ..
            }) => break,
            Some(_) => {}
            None => panic!("stream ended before the answer"),
        }
    }

    let before = run.state().clone();
    cancel.cancel();
    assert!(run.next().await.is_none());

    let TurnOutcome::Cancelled(state) = run.into_outcome() else {
        panic!("expected cancelled turn");
    };
    assert_eq!(state, before);
    assert!(!state.terminal);
    assert_eq!(state.phase, Some(Phase::Answer));
}

#[tokio::test]
async fn test_mock_wire_decodes_to_same_events_as_open() {
    let producer = MockProducer::new(Duration::ZERO);
    let question = "Who is Grace Hopper?";

    let bytes = producer.open(question).await.expect("open");
    let from_open: Vec<CanonicalEvent> = canonical_events(bytes, Duration::ZERO)
        .filter_map(|e| async move { e.ok() })
        .collect()
        .await;

    let text = producer.wire(question);
    let from_wire: Vec<CanonicalEvent> =
        canonical_events(stream::iter(chunked(&text, 5)), Duration::ZERO)
            .filter_map(|e| async move { e.ok() })
            .collect()
            .await;

    assert_eq!(from_open, from_wire);
    assert!(matches!(from_open.last(), Some(CanonicalEvent::Citations { .. })));
}
