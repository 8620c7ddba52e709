//! Conversation thread and session storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::TurnState;

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single conversation session.
///
/// Holds the ordered snapshots of every turn asked in this session. Only the
/// most recent turn can be running; beginning a new one cancels it.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    turns: RwLock<Vec<TurnState>>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    active: Mutex<Option<ActiveTurn>>,
}

#[derive(Debug)]
struct ActiveTurn {
    turn_id: String,
    cancel: CancellationToken,
    claimed: bool,
}

/// Serializable overview of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                turns: RwLock::new(Vec::new()),
                created_at: now,
                last_activity: RwLock::new(now),
                active: Mutex::new(None),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Record a new turn for `question` and make it the active one.
    ///
    /// Any turn still in flight is cancelled first.
    pub fn begin_turn(&self, question: impl Into<String>) -> TurnState {
        let state = TurnState::new(question);
        write(&self.inner.turns).push(state.clone());

        {
            let mut active = lock(&self.inner.active);
            if let Some(prev) = active.take() {
                prev.cancel.cancel();
                tracing::debug!(
                    name: "session.turn.superseded",
                    session_id = %self.inner.id,
                    turn_id = %prev.turn_id,
                    "Cancelled in-flight turn"
                );
            }
            *active = Some(ActiveTurn {
                turn_id: state.id.clone(),
                cancel: CancellationToken::new(),
                claimed: false,
            });
        }

        self.touch();
        state
    }

    /// Claim the active turn `turn_id` for streaming.
    ///
    /// Returns its current snapshot and cancellation token. A turn can be
    /// claimed once; superseded or unknown turns return `None`.
    #[must_use]
    pub fn claim_turn(&self, turn_id: &str) -> Option<(TurnState, CancellationToken)> {
        let token = {
            let mut active = lock(&self.inner.active);
            let turn = active.as_mut().filter(|t| t.turn_id == turn_id && !t.claimed)?;
            turn.claimed = true;
            turn.cancel.clone()
        };
        self.turn(turn_id).map(|state| (state, token))
    }

    /// Replace the stored snapshot of the turn with the same id.
    pub fn publish(&self, snapshot: &TurnState) {
        let mut turns = write(&self.inner.turns);
        if let Some(slot) = turns.iter_mut().find(|t| t.id == snapshot.id) {
            *slot = snapshot.clone();
        }
        drop(turns);
        self.touch();
    }

    /// Release the active slot if it still belongs to `turn_id`.
    pub fn end_turn(&self, turn_id: &str) {
        let mut active = lock(&self.inner.active);
        if active.as_ref().is_some_and(|t| t.turn_id == turn_id) {
            *active = None;
        }
    }

    /// Cancel the in-flight turn, if any.
    pub fn cancel_active(&self) {
        if let Some(turn) = lock(&self.inner.active).take() {
            turn.cancel.cancel();
        }
    }

    /// Id of the active turn.
    #[must_use]
    pub fn active_turn_id(&self) -> Option<String> {
        lock(&self.inner.active).as_ref().map(|t| t.turn_id.clone())
    }

    /// Snapshots of all turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> Vec<TurnState> {
        read(&self.inner.turns).clone()
    }

    /// Snapshot of one turn.
    #[must_use]
    pub fn turn(&self, turn_id: &str) -> Option<TurnState> {
        read(&self.inner.turns).iter().find(|t| t.id == turn_id).cloned()
    }

    /// Number of turns in the session.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        read(&self.inner.turns).len()
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.inner.id.clone(),
            turn_count: self.turn_count(),
            created_at: self.inner.created_at,
            last_activity: *read(&self.inner.last_activity),
        }
    }

    fn touch(&self) {
        *write(&self.inner.last_activity) = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let last = *read(&self.inner.last_activity);
        // A negative span means the clock moved backwards; treat as fresh.
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return it.
    #[must_use]
    pub fn create(&self) -> Session {
        self.create_with_id(Uuid::new_v4().to_string())
    }

    /// Create a new session with a specific ID.
    #[must_use]
    pub fn create_with_id(&self, id: impl Into<String>) -> Session {
        let id = id.into();
        let session = Session::new(id.clone());
        write(&self.sessions).insert(id, session.clone());
        session
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        read(&self.sessions).get(id).cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        if let Some(session) = self.get(id) {
            return session;
        }
        write(&self.sessions)
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string()))
            .clone()
    }

    /// Remove a session by ID, cancelling its in-flight turn.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = write(&self.sessions).remove(id);
        if let Some(session) = &removed {
            session.cancel_active();
        }
        removed
    }

    /// Get the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = write(&self.sessions);
        let before = guard.len();
        guard.retain(|_, session| {
            let keep = !session.is_expired_with_timeout(timeout);
            if !keep {
                session.cancel_active();
            }
            keep
        });
        before - guard.len()
    }

    /// Remove sessions idle for longer than [`DEFAULT_SESSION_TIMEOUT`].
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_with_timeout(DEFAULT_SESSION_TIMEOUT)
    }

    /// List all session IDs.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        read(&self.sessions).keys().cloned().collect()
    }

    /// Summaries of all sessions, most recently active first.
    #[must_use]
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> =
            read(&self.sessions).values().map(Session::summary).collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        out
    }
}
