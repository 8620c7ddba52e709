//! Conversation turn state and its reducer.
//!
//! A turn is one question and the answer streamed for it. The reducer is the
//! only writer of a turn's state; everything else receives snapshots.
//!
//! # Architecture
//!
//! - [`TurnReducer`]: folds canonical events into a [`TurnState`]
//! - [`TurnRun`]: pulls events from the pipeline, one at a time, with cancellation
//!
//! # Example
//!
//! ```rust
//! use answer_stream::conversation::{Phase, TurnReducer};
//! use answer_stream::normalized::CanonicalEvent;
//!
//! let mut reducer = TurnReducer::new("What is Rust?");
//! reducer.apply(&CanonicalEvent::InitialQuery { query: "What is Rust?".into() });
//! reducer.apply(&CanonicalEvent::FinalAnswer { text: "A language.".into() });
//!
//! assert_eq!(reducer.state().phase, Some(Phase::Done));
//! assert!(reducer.state().terminal);
//! ```

mod runner;
mod turn;

pub use runner::{EventStream, TurnOutcome, TurnRun, TurnUpdate};
pub use turn::{FAILURE_MESSAGE, Phase, PlanStep, StepId, StepStatus, TurnReducer, TurnState};
