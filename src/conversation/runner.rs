//! Pull-driven execution of one turn.
//!
//! A [`TurnRun`] owns the reducer and the canonical event stream. Each call to
//! [`TurnRun::next`] pulls exactly one event and folds it. Cancellation drops
//! the stream (and with it the transport) without touching the state again.

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::normalized::CanonicalEvent;

use super::turn::{TurnReducer, TurnState};

/// Boxed canonical event stream for one turn.
pub type EventStream = BoxStream<'static, Result<CanonicalEvent, Error>>;

/// One step of a running turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// An event was folded into the state.
    Applied {
        /// The event, in arrival order.
        event: CanonicalEvent,
        /// Whether the state changed.
        changed: bool,
    },
    /// The turn was forced into its terminal failure state.
    Failed {
        /// Why the turn failed.
        reason: String,
    },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The stream ended; the state is terminal.
    Finished(TurnState),
    /// The turn was superseded; the state is as it was when cancelled.
    Cancelled(TurnState),
}

impl TurnOutcome {
    /// The state at the end of the turn.
    pub fn state(&self) -> &TurnState {
        match self {
            Self::Finished(s) | Self::Cancelled(s) => s,
        }
    }
}

/// A turn in progress.
pub struct TurnRun {
    reducer: TurnReducer,
    events: Option<EventStream>,
    cancel: CancellationToken,
    cancelled: bool,
}

impl std::fmt::Debug for TurnRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRun")
            .field("state", self.reducer.state())
            .field("open", &self.events.is_some())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl TurnRun {
    /// Start a turn over an already opened event stream.
    pub fn new(reducer: TurnReducer, events: EventStream, cancel: CancellationToken) -> Self {
        Self {
            reducer,
            events: Some(events),
            cancel,
            cancelled: false,
        }
    }

    /// Start a turn whose transport could not be opened.
    ///
    /// The first call to [`TurnRun::next`] reports the failure.
    pub fn from_open_error(reducer: TurnReducer, err: Error, cancel: CancellationToken) -> Self {
        let events = futures::stream::once(async move { Err(err) }).boxed();
        Self::new(reducer, events, cancel)
    }

    /// Current state.
    pub fn state(&self) -> &TurnState {
        self.reducer.state()
    }

    /// Whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Pull and fold the next event.
    ///
    /// Returns `None` once the run is over: the stream ended after a final
    /// answer, a failure was already reported, or the run was cancelled.
    pub async fn next(&mut self) -> Option<TurnUpdate> {
        let events = self.events.as_mut()?;

        let item = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.close();
                self.cancelled = true;
                tracing::info!(
                    name: "turn.cancelled",
                    turn_id = %self.reducer.state().id,
                    "Turn cancelled"
                );
                return None;
            }
            item = events.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                let changed = self.reducer.apply(&event);
                Some(TurnUpdate::Applied { event, changed })
            }
            Some(Err(err)) => {
                self.close();
                if self.reducer.state().terminal {
                    tracing::debug!(
                        name: "turn.transport.late_error",
                        error = %err,
                        "Transport error after the final answer"
                    );
                    return None;
                }
                let reason = err.to_string();
                self.reducer.fail(reason.clone());
                Some(TurnUpdate::Failed { reason })
            }
            None => {
                self.close();
                if self.reducer.state().terminal {
                    return None;
                }
                self.reducer.finish();
                let reason = self.reducer.state().error.clone().unwrap_or_default();
                Some(TurnUpdate::Failed { reason })
            }
        }
    }

    /// Drive the run to its end.
    pub async fn run_to_end(mut self) -> TurnOutcome {
        while self.next().await.is_some() {}
        self.into_outcome()
    }

    /// Finish the run, dropping the stream if it is still open.
    pub fn into_outcome(mut self) -> TurnOutcome {
        self.close();
        let cancelled = self.cancelled;
        let state = self.reducer.into_state();
        if cancelled {
            TurnOutcome::Cancelled(state)
        } else {
            TurnOutcome::Finished(state)
        }
    }

    fn close(&mut self) {
        // Dropping the stream releases the underlying transport.
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::turn::{FAILURE_MESSAGE, Phase};
    use futures::stream;

    fn ok(events: Vec<CanonicalEvent>) -> EventStream {
        stream::iter(events.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn test_run_to_final_answer() {
        let events = ok(vec![
            CanonicalEvent::InitialQuery { query: "q".to_string() },
            CanonicalEvent::FinalAnswer { text: "answer".to_string() },
        ]);
        let run = TurnRun::new(TurnReducer::new("q"), events, CancellationToken::new());

        let TurnOutcome::Finished(state) = run.run_to_end().await else {
            panic!("expected finished");
        };
        assert_eq!(state.phase, Some(Phase::Done));
        assert_eq!(state.accumulated_text, "answer");
    }

    #[tokio::test]
    async fn test_abrupt_end_fails_turn() {
        let events = ok(vec![CanonicalEvent::InitialQuery { query: "q".to_string() }]);
        let mut run = TurnRun::new(TurnReducer::new("q"), events, CancellationToken::new());

        assert!(matches!(run.next().await, Some(TurnUpdate::Applied { changed: true, .. })));
        assert!(matches!(run.next().await, Some(TurnUpdate::Failed { .. })));
        assert!(run.next().await.is_none());

        let state = run.into_outcome().state().clone();
        assert!(state.terminal);
        assert_eq!(state.accumulated_text, FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_open_error_fails_turn() {
        let run = TurnRun::from_open_error(
            TurnReducer::new("q"),
            Error::Transport("connection refused".to_string()),
            CancellationToken::new(),
        );
        let state = run.run_to_end().await.state().clone();
        assert!(state.terminal);
        assert_eq!(state.error.as_deref(), Some("Transport error: connection refused"));
    }

    #[tokio::test]
    async fn test_transport_error_after_final_keeps_answer() {
        let events = stream::iter(vec![
            Ok(CanonicalEvent::FinalAnswer { text: "kept".to_string() }),
            Err(Error::Transport("reset".to_string())),
        ])
        .boxed();
        let run = TurnRun::new(TurnReducer::new("q"), events, CancellationToken::new());
        let state = run.run_to_end().await.state().clone();
        assert_eq!(state.accumulated_text, "kept");
        assert!(!state.is_failed());
    }

    #[tokio::test]
    async fn test_cancel_stops_without_mutation() {
        let cancel = CancellationToken::new();
        let events = stream::iter(vec![Ok(CanonicalEvent::InitialQuery { query: "q".to_string() })])
            .chain(stream::pending())
            .boxed();
        let mut run = TurnRun::new(TurnReducer::new("q"), events, cancel.clone());

        assert!(run.next().await.is_some());
        let before = run.state().clone();

        cancel.cancel();
        assert!(run.next().await.is_none());
        assert!(run.is_cancelled());

        let TurnOutcome::Cancelled(state) = run.into_outcome() else {
            panic!("expected cancelled");
        };
        assert_eq!(state, before);
        assert!(!state.terminal);
    }
}
