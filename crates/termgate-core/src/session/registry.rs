//! Session registry: one input buffer per session key.
//!
//! The registry is owned by a gateway instance and shared across channel tasks
//! behind an `Arc`. Each channel mutates only its own buffer, so a single
//! `RwLock` around the map is the only synchronisation needed.

use crate::error::{GateError, GateResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A channel's claim on a session key.
///
/// A key that is reopened gets a fresh buffer and a new `conn_id`; handles
/// carrying the old `conn_id` are stale from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    key: String,
    conn_id: u64,
}

impl SessionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }
}

/// Buffered state for one session key.
struct Session {
    /// Characters typed since the last submit or since the channel opened.
    buffer: String,
    /// When the owning channel registered the key.
    opened_at: Instant,
    /// Channel that currently owns the key.
    conn_id: u64,
}

/// Information returned when listing sessions.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub key: String,
    pub age_secs: u64,
    pub buffered_chars: usize,
}

/// Registry of active session buffers, keyed by session key.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    max_sessions: usize,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry that admits at most `max_sessions` keys.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a channel for `key` with an empty buffer.
    ///
    /// Reopening an active key resets its buffer and supersedes the previous
    /// channel's handle. A new key is refused once `max_sessions` keys are
    /// active.
    pub async fn open(&self, key: &str) -> GateResult<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(key) && sessions.len() >= self.max_sessions {
            return Err(GateError::SessionLimit(self.max_sessions));
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            buffer: String::new(),
            opened_at: Instant::now(),
            conn_id,
        };
        match sessions.insert(key.to_string(), session) {
            Some(previous) => info!(
                session_key = %key,
                conn_id,
                superseded = previous.conn_id,
                "session reopened, buffer reset"
            ),
            None => info!(session_key = %key, conn_id, "session opened"),
        }

        Ok(SessionHandle {
            key: key.to_string(),
            conn_id,
        })
    }

    /// Drop the session if `handle` still owns it. Returns whether an entry
    /// was removed; a stale handle never removes its successor.
    pub async fn close(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&handle.key) {
            Some(session) if session.conn_id == handle.conn_id => {
                sessions.remove(&handle.key);
                info!(session_key = %handle.key, conn_id = handle.conn_id, "session closed");
                true
            }
            _ => {
                debug!(session_key = %handle.key, conn_id = handle.conn_id, "stale handle closed");
                false
            }
        }
    }

    /// Append input verbatim to the buffer.
    pub async fn push(&self, handle: &SessionHandle, text: &str) -> GateResult<()> {
        self.with_session_mut(handle, |s| {
            s.buffer.push_str(text);
        })
        .await
    }

    /// Remove the last buffered character. Returns `false` on an empty buffer.
    pub async fn erase(&self, handle: &SessionHandle) -> GateResult<bool> {
        self.with_session_mut(handle, |s| s.buffer.pop().is_some())
            .await
    }

    /// Take the buffer contents, leaving it empty.
    pub async fn take(&self, handle: &SessionHandle) -> GateResult<String> {
        self.with_session_mut(handle, |s| std::mem::take(&mut s.buffer))
            .await
    }

    /// Snapshot of the current buffer.
    pub async fn buffer(&self, handle: &SessionHandle) -> GateResult<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&handle.key)
            .filter(|s| s.conn_id == handle.conn_id)
            .map(|s| s.buffer.clone())
            .ok_or_else(|| GateError::SessionNotFound(handle.key.clone()))
    }

    /// List all active sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(key, s)| SessionInfo {
                key: key.clone(),
                age_secs: s.opened_at.elapsed().as_secs(),
                buffered_chars: s.buffer.chars().count(),
            })
            .collect()
    }

    /// Number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn with_session_mut<F, R>(&self, handle: &SessionHandle, f: F) -> GateResult<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&handle.key)
            .filter(|s| s.conn_id == handle.conn_id)
            .ok_or_else(|| GateError::SessionNotFound(handle.key.clone()))?;
        Ok(f(session))
    }
}
