use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Governs whether replies are delivered as synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Text,
    VoiceAssistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Upper-cased label used when rendering history into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// One ongoing conversation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub history: Vec<Turn>,
    pub mode: Mode,
    /// Mirrors the last request's career flag. Advisory only; the per-request
    /// flag drives every decision.
    pub career_suggest_active: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            mode: Mode::Text,
            career_suggest_active: false,
        }
    }

    pub fn push_exchange(&mut self, user_text: &str, assistant_text: &str) {
        self.history.push(Turn::user(user_text));
        self.history.push(Turn::assistant(assistant_text));
    }
}

/// Shared handle to a session. The turn orchestrator keeps it locked for the
/// whole turn, which serializes concurrent requests for the same id.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    last_active: Instant,
}

/// Process-wide mapping from session id to session state.
///
/// The outer map lock is only held for lookups and inserts, never across an
/// `.await`, so turns on different sessions run concurrently.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
}

/// One session in the administrative view. A session locked by an in-flight
/// turn is reported as `busy` instead of being waited on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionSummary {
    Idle {
        messages: usize,
        mode: Mode,
        career_active: bool,
    },
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionsOverview {
    pub sessions_count: usize,
    pub sessions: BTreeMap<String, SessionSummary>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating an empty text-mode session on
    /// first reference.
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        let now = Instant::now();
        let mut sessions = self.lock_map();
        let entry = sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(session_id = %id, "Creating new session");
            Entry {
                handle: Arc::new(tokio::sync::Mutex::new(Session::new(id))),
                last_active: now,
            }
        });
        entry.last_active = now;
        entry.handle.clone()
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view used by the administrative inspection endpoint. Never
    /// waits on a running turn and never touches history, mode or activity
    /// time.
    pub fn summaries(&self) -> SessionsOverview {
        let handles: Vec<(String, SessionHandle)> = self
            .lock_map()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.handle.clone()))
            .collect();

        let sessions: BTreeMap<String, SessionSummary> = handles
            .into_iter()
            .map(|(id, handle)| {
                let summary = match handle.try_lock() {
                    Ok(session) => SessionSummary::Idle {
                        messages: session.history.len(),
                        mode: session.mode,
                        career_active: session.career_suggest_active,
                    },
                    Err(_) => SessionSummary::Busy,
                };
                (id, summary)
            })
            .collect();

        SessionsOverview {
            sessions_count: sessions.len(),
            sessions,
        }
    }

    /// Drops sessions that have not been referenced for longer than
    /// `max_idle`. Sessions whose handle is still held elsewhere (a turn in
    /// progress) are kept. Returns the number of sessions removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock_map();
        let before = sessions.len();
        sessions.retain(|_, entry| {
            Arc::strong_count(&entry.handle) > 1
                || now.duration_since(entry.last_active) <= max_idle
        });
        before - sessions.len()
    }

    /// Runs [`SessionStore::evict_idle`] every `interval` (at least one second)
    /// for the lifetime of the runtime.
    pub fn spawn_eviction(self: Arc<Self>, interval: Duration, max_idle: Duration) {
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.evict_idle(max_idle);
                if removed > 0 {
                    tracing::info!(removed, remaining = self.len(), "Evicted idle sessions");
                }
            }
        });
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding this lock cannot leave the map half-updated,
        // so a poisoned lock is still safe to use.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
