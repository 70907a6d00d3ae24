use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use teloxide::types::UserId;
use tokio::sync::Mutex;

use crate::api::flow::{InputSpec, NodeId};

const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Marker for a node waiting for a free-text answer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    pub node: NodeId,
    pub input: InputSpec,
    pub next: Option<NodeId>,
}

/// Transient per-user conversation state
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub current_node: Option<NodeId>,
    /// At most one node waits for text at a time
    pub pending: Option<PendingInput>,
    /// Multi-select choices in progress, per node
    pub selections: HashMap<NodeId, Vec<String>>,
    pub touched_at: DateTime<Utc>,
}

impl Session {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_node: None,
            pending: None,
            selections: HashMap::new(),
            touched_at: now,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Trait for session storage operations
#[async_trait::async_trait]
pub trait SessionStorageTrait: Send + Sync {
    /// Get the session of a user, a fresh one if absent or expired
    async fn get_session(&self, user_id: UserId) -> Session;

    /// Store the session and refresh its expiry
    async fn save_session(&self, user_id: UserId, session: Session);

    /// Drop the session of a user
    async fn reset_session(&self, user_id: UserId);

    /// Remove sessions idle for longer than the TTL, returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

type SessionStorageData = Arc<Mutex<HashMap<UserId, Session>>>;

/// In-process session storage with idle expiry
#[derive(Clone)]
pub struct SessionStorage {
    data: SessionStorageData,
    ttl: TimeDelta,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::with_ttl(TimeDelta::hours(DEFAULT_SESSION_TTL_HOURS))
    }

    pub fn with_ttl(ttl: TimeDelta) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(session.touched_at) >= self.ttl
    }
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStorageTrait for SessionStorage {
    async fn get_session(&self, user_id: UserId) -> Session {
        let now = Utc::now();
        let mut storage_guard = self.data.lock().await;
        match storage_guard.get(&user_id) {
            Some(session) if !self.is_expired(session, now) => session.clone(),
            Some(_) => {
                storage_guard.remove(&user_id);
                Session::new(now)
            }
            None => Session::new(now),
        }
    }

    async fn save_session(&self, user_id: UserId, mut session: Session) {
        session.touched_at = Utc::now();
        let mut storage_guard = self.data.lock().await;
        storage_guard.insert(user_id, session);
    }

    async fn reset_session(&self, user_id: UserId) {
        let mut storage_guard = self.data.lock().await;
        storage_guard.remove(&user_id);
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut storage_guard = self.data.lock().await;
        let before = storage_guard.len();
        storage_guard.retain(|_, session| !self.is_expired(session, now));
        before - storage_guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::flow::InputKind;

    fn pending() -> PendingInput {
        PendingInput {
            node: "ask_email".to_string(),
            input: InputSpec {
                variable: "email".to_string(),
                kind: InputKind::Email,
                min_length: None,
                max_length: None,
                retry_text: None,
            },
            next: Some("done".to_string()),
        }
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_reset() {
        let storage = SessionStorage::new();
        let user = UserId(1);

        let mut session = storage.get_session(user).await;
        assert!(session.current_node.is_none());

        session.current_node = Some("ask_email".to_string());
        session.pending = Some(pending());
        storage.save_session(user, session).await;

        let loaded = storage.get_session(user).await;
        assert_eq!(loaded.current_node.as_deref(), Some("ask_email"));
        assert_eq!(loaded.pending, Some(pending()));

        // Other users are unaffected
        assert!(storage.get_session(UserId(2)).await.pending.is_none());

        storage.reset_session(user).await;
        assert!(storage.get_session(user).await.pending.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_reads_fresh() {
        let storage = SessionStorage::with_ttl(TimeDelta::zero());
        let user = UserId(1);

        let mut session = Session::default();
        session.pending = Some(pending());
        storage.save_session(user, session).await;

        assert!(storage.get_session(user).await.pending.is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let storage = SessionStorage::with_ttl(TimeDelta::minutes(30));
        storage.save_session(UserId(1), Session::default()).await;
        storage.save_session(UserId(2), Session::default()).await;

        assert_eq!(storage.purge_expired(Utc::now()).await, 0);
        assert_eq!(
            storage
                .purge_expired(Utc::now() + TimeDelta::minutes(31))
                .await,
            2
        );
    }
}
