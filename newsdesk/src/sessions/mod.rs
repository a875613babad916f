use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::types::Briefing;

pub mod websocket;

/// One user's chat: bounded history plus the last briefing shown, so
/// follow-ups like "#2" have something to point at.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    history: Vec<ChatMessage>,
    last_briefing: Option<Briefing>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(max_turns: usize) -> Self {
        Self::with_id(Uuid::new_v4(), max_turns)
    }

    pub fn with_id(id: Uuid, max_turns: usize) -> Self {
        Self {
            id,
            history: Vec::new(),
            last_briefing: None,
            max_turns: max_turns.max(1),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn last_briefing(&self) -> Option<&Briefing> {
        self.last_briefing.as_ref()
    }

    pub fn set_briefing(&mut self, briefing: Briefing) {
        self.last_briefing = Some(briefing);
    }

    /// Record a user/assistant exchange, dropping the oldest turns past the limit.
    pub fn push_exchange(&mut self, user: &str, assistant: &str) {
        self.history.push(ChatMessage::user(user));
        self.history.push(ChatMessage::assistant(assistant));
        let max_messages = self.max_turns * 2;
        if self.history.len() > max_messages {
            let excess = self.history.len() - max_messages;
            self.history.drain(..excess);
        }
    }

    pub fn turns(&self) -> usize {
        self.history.len() / 2
    }
}

pub type ConversationHandle = Arc<tokio::sync::Mutex<Conversation>>;

pub const DEFAULT_IDLE_MINUTES: i64 = 60;
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

struct SessionEntry {
    handle: ConversationHandle,
    last_used: DateTime<Utc>,
    // Tie-breaker for eviction order; timestamps can collide
    seq: u64,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<Uuid, SessionEntry>,
    seq: u64,
}

impl Sessions {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict_idle(&mut self, now: DateTime<Utc>, idle_ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.last_used < idle_ttl);
        before - self.entries.len()
    }

    fn evict_least_recent(&mut self) -> Option<Uuid> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(id, _)| *id)?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// In-memory conversations keyed by session id. Nothing survives a restart.
/// Sessions idle longer than `idle_ttl` are dropped, and past `max_sessions`
/// the least recently used one makes room for a new one.
pub struct SessionStore {
    sessions: Mutex<Sessions>,
    history_turns: usize,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(history_turns: usize) -> Self {
        Self::with_limits(
            history_turns,
            Duration::minutes(DEFAULT_IDLE_MINUTES),
            DEFAULT_MAX_SESSIONS,
        )
    }

    pub fn with_limits(history_turns: usize, idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            history_turns,
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Known id: its conversation. Unknown id: a fresh conversation under that id.
    /// No id: a fresh conversation under a new id.
    pub fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, ConversationHandle) {
        self.get_or_create_at(id, Utc::now())
    }

    pub fn get_or_create_at(&self, id: Option<Uuid>, now: DateTime<Utc>) -> (Uuid, ConversationHandle) {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let mut sessions = self.lock();
        let seq = sessions.next_seq();

        if let Some(entry) = sessions.entries.get_mut(&id) {
            entry.last_used = now;
            entry.seq = seq;
            return (id, entry.handle.clone());
        }

        let expired = sessions.evict_idle(now, self.idle_ttl);
        if expired > 0 {
            debug!(expired, "sessions: dropped idle conversations");
        }
        while sessions.entries.len() >= self.max_sessions {
            match sessions.evict_least_recent() {
                Some(evicted) => info!(session = %evicted, "sessions: store full, evicted least recent"),
                None => break,
            }
        }

        let handle = Arc::new(tokio::sync::Mutex::new(Conversation::with_id(id, self.history_turns)));
        sessions.entries.insert(
            id,
            SessionEntry {
                handle: handle.clone(),
                last_used: now,
                seq,
            },
        );
        (id, handle)
    }

    /// Mark a session as active without fetching it.
    pub fn touch(&self, id: &Uuid) {
        let mut sessions = self.lock();
        let seq = sessions.next_seq();
        if let Some(entry) = sessions.entries.get_mut(id) {
            entry.last_used = Utc::now();
            entry.seq = seq;
        }
    }

    /// Drop sessions idle for longer than the TTL as of `now`; returns how many went.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        self.lock().evict_idle(now, self.idle_ttl)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
