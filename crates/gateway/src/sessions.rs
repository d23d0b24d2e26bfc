//! In-memory chat sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use toolbridge_core::message::{Message, Role};

/// Maximum number of sessions kept; the oldest is evicted beyond this.
pub const MAX_SESSIONS: usize = 1000;

const TITLE_LEN: usize = 50;
const UNTITLED: &str = "New Session";

/// One conversation with the assistant.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: UNTITLED.into(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a completed exchange. The first one names the session.
    pub fn record_exchange(&mut self, user: Message, reply: Message) {
        if self.history.is_empty() {
            self.title = title_for(&user.content);
        }
        self.history.push(user);
        self.history.push(reply);
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.history.len(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }

    pub fn detail(&self) -> SessionDetail {
        SessionDetail {
            summary: self.summary(),
            messages: self
                .history
                .iter()
                .map(|m| HistoryEntry {
                    role: m.role.clone(),
                    content: m.content.clone(),
                    timestamp: m.timestamp.to_rfc3339(),
                })
                .collect(),
        }
    }
}

/// Title from the first user message: its first 50 characters, with `...`
/// when it was cut.
pub fn title_for(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        return UNTITLED.into();
    }
    if message.chars().count() > TITLE_LEN {
        let cut: String = message.chars().take(TITLE_LEN).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub messages: Vec<HistoryEntry>,
}

/// All sessions, keyed by id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// History of `id` so far; empty for an unknown session.
    pub fn history(&self, id: &str) -> Vec<Message> {
        self.sessions
            .get(id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Append an exchange, creating the session if needed.
    pub fn record(&mut self, id: &str, user: Message, reply: Message) {
        if !self.sessions.contains_key(id) && self.sessions.len() >= MAX_SESSIONS {
            self.evict_oldest();
        }
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id))
            .record_exchange(user, reply);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .sessions
            .values()
            .min_by_key(|s| s.created_at)
            .map(|s| s.id.clone())
        {
            self.sessions.remove(&oldest);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Newest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.into_iter().map(Session::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_truncated_first_message() {
        assert_eq!(title_for("Where is the pet policy?"), "Where is the pet policy?");
        let long = "a".repeat(60);
        assert_eq!(title_for(&long), format!("{}...", "a".repeat(50)));
        assert_eq!(title_for(&"b".repeat(50)), "b".repeat(50));
        assert_eq!(title_for("   "), "New Session");
        // Multi-byte characters are cut on character boundaries.
        assert_eq!(title_for(&"é".repeat(51)), format!("{}...", "é".repeat(50)));
    }

    #[test]
    fn first_exchange_names_the_session() {
        let mut store = SessionStore::new();
        store.record("s1", Message::user("How do I file an issue?"), Message::assistant("Like this."));
        store.record("s1", Message::user("Thanks"), Message::assistant("Welcome."));

        let session = store.get("s1").unwrap();
        assert_eq!(session.title, "How do I file an issue?");
        assert_eq!(session.history.len(), 4);
        assert_eq!(store.history("s1").len(), 4);
        assert!(store.history("missing").is_empty());
    }

    #[test]
    fn remove_and_list() {
        let mut store = SessionStore::new();
        store.record("a", Message::user("one"), Message::assistant("1"));
        store.record("b", Message::user("two"), Message::assistant("2"));
        assert_eq!(store.summaries().len(), 2);
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len(), 1);
    }
}
