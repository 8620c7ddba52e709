//! Answer producers that feed the pipeline.
//!
//! An [`Upstream`] takes a question and returns the raw inbound wire stream
//! (`data:` blocks). What computes the answer is opaque to the pipeline.
//!
//! # Producers
//!
//! - [`HttpUpstream`]: POSTs `{ "question": ... }` to a remote endpoint
//! - [`MockProducer`]: in-process producer emitting the legacy wire shape

mod http;
mod mock;

pub use http::HttpUpstream;
pub use mock::{MockProducer, Topic};

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::conversation::{TurnReducer, TurnRun};
use crate::error::Result;
use crate::stream::canonical_events;

/// Raw bytes of the inbound wire stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Trait for answer producers.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    /// Open the wire stream for `question`.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be reached or refuses the request.
    async fn open(&self, question: &str) -> Result<ByteStream>;
}

/// Open `question` on `upstream` and wrap it in a [`TurnRun`].
///
/// An open failure does not return an error; the run reports it on its first
/// pull and ends in the failure state.
pub async fn start_turn(
    upstream: &dyn Upstream,
    reducer: TurnReducer,
    reveal_delay: Duration,
    cancel: CancellationToken,
) -> TurnRun {
    let question = reducer.state().question.clone();
    tracing::info!(
        name: "turn.started",
        turn_id = %reducer.state().id,
        question = %question,
        "Starting turn"
    );

    match upstream.open(&question).await {
        Ok(bytes) => TurnRun::new(reducer, canonical_events(bytes, reveal_delay).boxed(), cancel),
        Err(err) => {
            tracing::error!(
                name: "upstream.open_failed",
                error = %err,
                "Failed to open upstream stream"
            );
            TurnRun::from_open_error(reducer, err, cancel)
        }
    }
}
