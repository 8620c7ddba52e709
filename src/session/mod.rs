//! Session and conversation thread management.
//!
//! Sessions are kept in memory, identified by UUID, and hold read-only
//! snapshots of each turn asked in them.
//!
//! # Architecture
//!
//! - [`Session`]: one conversation, with at most one turn in flight
//! - [`SessionStore`]: thread-safe store for all active sessions
//!
//! # Example
//!
//! ```rust
//! use answer_stream::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let session = store.create();
//! let turn = session.begin_turn("What is Rust?");
//!
//! assert_eq!(session.turns().len(), 1);
//! assert_eq!(session.active_turn_id(), Some(turn.id));
//! ```

mod thread;

pub use thread::{DEFAULT_SESSION_TIMEOUT, Session, SessionStore, SessionSummary};
