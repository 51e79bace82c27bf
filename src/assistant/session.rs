//! In-memory study sessions and their conversation logs.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_SESSION_NAME: &str = "New Study Session";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMethod {
    #[default]
    Text,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub user_input: String,
    pub ai_response: String,
    pub input_method: InputMethod,
    /// Length of the spoken input in seconds, zero for typed input.
    pub audio_duration: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudySession {
    pub id: u64,
    pub session_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub total_interactions: u64,
}

#[derive(Debug)]
struct Record {
    session: StudySession,
    conversations: Vec<Conversation>,
}

#[derive(Default)]
struct Sessions {
    next_id: u64,
    records: HashMap<u64, Record>,
}

/// Session store. Ids start at 1 and are never reused.
pub struct SessionStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Sessions>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Sessions::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, name: Option<&str>) -> StudySession {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_SESSION_NAME);
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.next_id += 1;
        let session = StudySession {
            id: inner.next_id,
            session_name: name.to_string(),
            created_at: now,
            updated_at: now,
            total_interactions: 0,
        };
        inner.records.insert(
            session.id,
            Record {
                session: session.clone(),
                conversations: Vec::new(),
            },
        );
        tracing::info!(session_id = session.id, name = %session.session_name, "created study session");
        session
    }

    pub fn get(&self, id: u64) -> Result<StudySession> {
        self.lock()
            .records
            .get(&id)
            .map(|r| r.session.clone())
            .ok_or_else(|| missing(id))
    }

    /// Append an exchange and bump the interaction counter.
    pub fn record(
        &self,
        id: u64,
        user_input: impl Into<String>,
        ai_response: impl Into<String>,
        input_method: InputMethod,
        audio_duration: f64,
    ) -> Result<StudySession> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let record = inner.records.get_mut(&id).ok_or_else(|| missing(id))?;
        record.conversations.push(Conversation {
            user_input: user_input.into(),
            ai_response: ai_response.into(),
            input_method,
            audio_duration: audio_duration.max(0.0),
            timestamp: now,
        });
        record.session.total_interactions += 1;
        record.session.updated_at = now;
        Ok(record.session.clone())
    }

    /// The last `n` exchanges, oldest first.
    pub fn recent(&self, id: u64, n: usize) -> Result<Vec<Conversation>> {
        let inner = self.lock();
        let record = inner.records.get(&id).ok_or_else(|| missing(id))?;
        let skip = record.conversations.len().saturating_sub(n);
        Ok(record.conversations[skip..].to_vec())
    }

    pub fn history(&self, id: u64) -> Result<Vec<Conversation>> {
        self.recent(id, usize::MAX)
    }

    /// Sessions ordered by most recent activity, at most `limit`.
    pub fn list_recent(&self, limit: usize) -> Vec<StudySession> {
        let mut sessions: Vec<StudySession> =
            self.lock().records.values().map(|r| r.session.clone()).collect();
        sessions.sort_by(|a, b| {
            b.updated_at
                .partial_cmp(&a.updated_at)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.id.cmp(&a.id))
        });
        sessions.truncate(limit);
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(id: u64) -> Error {
    Error::NotFound {
        message: format!("session {} does not exist", id),
        context: ErrorContext::new()
            .with_field_path("session_id")
            .with_source("session_store"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, SessionStore) {
        let clock = Arc::new(ManualClock::new(100.0));
        let store = SessionStore::with_clock(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_create_assigns_ids_and_default_name() {
        let (_, store) = store();
        let a = store.create(Some("Biology"));
        let b = store.create(Some("   "));
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.session_name, "Biology");
        assert_eq!(b.session_name, DEFAULT_SESSION_NAME);
        assert_eq!(a.created_at, 100.0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_record_and_recent_history() {
        let (clock, store) = store();
        let s = store.create(None);
        for i in 0..7 {
            clock.advance(1.0);
            store
                .record(s.id, format!("q{}", i), format!("a{}", i), InputMethod::Text, 0.0)
                .unwrap();
        }
        let updated = store
            .record(s.id, "spoken", "heard", InputMethod::Voice, 3.5)
            .unwrap();
        assert_eq!(updated.total_interactions, 8);
        assert_eq!(updated.updated_at, 107.0);

        let recent = store.recent(s.id, 5).unwrap();
        let inputs: Vec<_> = recent.iter().map(|c| c.user_input.as_str()).collect();
        assert_eq!(inputs, vec!["q3", "q4", "q5", "q6", "spoken"]);
        assert_eq!(recent[4].input_method, InputMethod::Voice);
        assert_eq!(recent[4].audio_duration, 3.5);
        assert_eq!(store.history(s.id).unwrap().len(), 8);
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let (_, store) = store();
        let err = store.record(42, "q", "a", InputMethod::Text, 0.0).unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(store.get(42).is_err());
        assert!(store.recent(42, 5).is_err());
    }

    #[test]
    fn test_list_recent_orders_by_activity() {
        let (clock, store) = store();
        let a = store.create(Some("a"));
        clock.advance(1.0);
        let b = store.create(Some("b"));
        clock.advance(1.0);
        store.record(a.id, "q", "r", InputMethod::Text, 0.0).unwrap();
        let ids: Vec<u64> = store.list_recent(5).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(store.list_recent(1).len(), 1);
    }
}
