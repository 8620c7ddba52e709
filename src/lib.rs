//! Answer Stream
//!
//! Turns an upstream producer's server-sent event stream into a live,
//! progressively revealed conversation turn: search plan, sources, a
//! word-paced answer, and citations.
//!
//! # Architecture
//!
//! - **Pipeline**: bytes → frames → canonical events → expanded answer
//! - **Reducer**: folds canonical events into a monotonic per-turn state
//! - **Server**: Axum HTTP surface re-emitting canonical events as SSE
//!
//! # Modules
//!
//! - [`stream`]: frame decoding, normalization, and final-answer expansion
//! - [`normalized`]: canonical event model and its SSE encoding
//! - [`conversation`]: turn state, reducer, and pull-driven turn runs
//! - [`upstream`]: answer producers (HTTP and in-process)
//! - [`session`]: in-memory session and turn snapshot storage

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod normalized;
pub mod server;
pub mod session;
pub mod source;
pub mod stream;
pub mod upstream;

pub use error::{Error, Result};

use std::sync::Arc;

use crate::config::AppConfig;
use session::SessionStore;
use upstream::{HttpUpstream, MockProducer, Upstream};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Producer feeding chat turns.
    pub upstream: Arc<dyn Upstream>,
    /// In-process producer behind `POST /api/stream`.
    pub producer: Arc<MockProducer>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.sessions.len())
            .field("upstream", &self.upstream)
            .finish()
    }
}

impl AppState {
    /// Build the state for `config`.
    ///
    /// Chat turns go to `upstream.url` when set, otherwise to the in-process
    /// producer.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self> {
        let producer = Arc::new(MockProducer::new(config.pacing.producer_step_delay()));
        let upstream: Arc<dyn Upstream> = match &config.upstream.url {
            Some(url) => Arc::new(HttpUpstream::new(url, config.upstream.timeout())?),
            None => Arc::clone(&producer) as Arc<dyn Upstream>,
        };
        Ok(Self::with_upstream(config, upstream, producer))
    }

    /// Build the state around an explicit producer.
    pub fn with_upstream(
        config: Arc<AppConfig>,
        upstream: Arc<dyn Upstream>,
        producer: Arc<MockProducer>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            upstream,
            producer,
            config,
        }
    }
}
