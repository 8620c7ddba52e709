//! Inbound answer stream pipeline.
//!
//! Raw bytes flow through three pull-driven stages:
//!
//! 1. [`frame`]: bytes → complete `data:` records
//! 2. [`normalizer`]: record → [`CanonicalEvent`] (or dropped)
//! 3. [`expander`]: the final-answer record → paced reveal sequence
//!
//! [`canonical_events`] composes them. Nothing is read from the transport
//! until the consumer pulls, and dropping the returned stream drops the
//! transport with it.

pub mod expander;
pub mod frame;
pub mod normalizer;

use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::Error;
use crate::normalized::CanonicalEvent;

pub use expander::{FALLBACK_ANSWER, WORDS_PER_CHUNK, chunk_words, expand, expand_paced};
pub use frame::{Frame, FrameDecoder, RawRecord, decode_frames};
pub use normalizer::{Normalized, normalize};

/// Decode, normalize and expand a raw byte stream.
///
/// `reveal_delay` paces the expanded final-answer events; pass
/// [`Duration::ZERO`] to disable pacing. Transport errors are yielded once
/// and end the stream.
pub fn canonical_events<S, B>(
    bytes: S,
    reveal_delay: Duration,
) -> impl Stream<Item = Result<CanonicalEvent, Error>> + Send
where
    S: Stream<Item = Result<B, Error>> + Send,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let records = decode_frames(bytes);
        futures::pin_mut!(records);

        while let Some(record) = records.next().await {
            let record = record?;
            match normalize(&record) {
                Some(Normalized::Event(event)) => yield event,
                Some(Normalized::FinalStep(body)) => {
                    let expanded = expand_paced(body, reveal_delay);
                    futures::pin_mut!(expanded);
                    while let Some(event) = expanded.next().await {
                        yield event;
                    }
                }
                None => {}
            }
        }
    }
}
