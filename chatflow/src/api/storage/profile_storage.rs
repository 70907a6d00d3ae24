use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use teloxide::types::{User, UserId};
use tokio::sync::Mutex;

use crate::api::error::StorageError;

/// Answers collected from a user, keyed by variable name
pub type Profile = Map<String, Value>;

/// Telegram identity of the user driving an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserInfo {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            last_name: None,
        }
    }
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
            last_name: user.last_name.clone(),
        }
    }
}

/// Trait for durable per-user profile operations
#[async_trait::async_trait]
pub trait ProfileStorageTrait: Send + Sync {
    /// Register the user on first contact, refresh identity fields and bump the interaction counter
    async fn record_interaction(&self, user: &UserInfo) -> Result<(), StorageError>;

    /// Get all stored answers of a user, empty if the user is unknown
    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StorageError>;

    /// Merge one key into the user's answers, leaving other keys untouched
    async fn set_value(&self, user_id: UserId, key: &str, value: Value)
    -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
struct UserRecord {
    info: UserInfo,
    registered_at: DateTime<Utc>,
    last_interaction: DateTime<Utc>,
    interaction_count: u64,
    data: Profile,
    /// Keys whose last write reached memory but not the durable store
    unsynced: HashSet<String>,
}

impl UserRecord {
    fn new(info: UserInfo) -> Self {
        let now = Utc::now();
        Self {
            info,
            registered_at: now,
            last_interaction: now,
            interaction_count: 0,
            data: Profile::new(),
            unsynced: HashSet::new(),
        }
    }
}

type ProfileStorageData = Arc<Mutex<HashMap<UserId, UserRecord>>>;

/// In-memory profile storage, lost on restart
#[derive(Clone)]
pub struct ProfileStorage {
    data: ProfileStorageData,
}

impl ProfileStorage {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of recorded interactions of a user
    pub async fn interaction_count(&self, user_id: UserId) -> u64 {
        let storage_guard = self.data.lock().await;
        storage_guard
            .get(&user_id)
            .map(|record| record.interaction_count)
            .unwrap_or(0)
    }

    /// Record whether the durable copy of `key` is behind the memory copy
    async fn set_unsynced(&self, user_id: UserId, key: &str, unsynced: bool) {
        let mut storage_guard = self.data.lock().await;
        let record = storage_guard
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(UserInfo::new(user_id)));
        if unsynced {
            record.unsynced.insert(key.to_string());
        } else {
            record.unsynced.remove(key);
        }
    }

    /// Take a profile read from the durable store, keeping the memory values
    /// of keys the durable store never received
    async fn refresh_from(&self, user_id: UserId, mut profile: Profile) -> Profile {
        let mut storage_guard = self.data.lock().await;
        let record = storage_guard
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(UserInfo::new(user_id)));
        for key in &record.unsynced {
            if let Some(value) = record.data.get(key) {
                profile.insert(key.clone(), value.clone());
            }
        }
        record.data = profile.clone();
        profile
    }
}

impl Default for ProfileStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProfileStorageTrait for ProfileStorage {
    async fn record_interaction(&self, user: &UserInfo) -> Result<(), StorageError> {
        let mut storage_guard = self.data.lock().await;
        let record = storage_guard
            .entry(user.id)
            .or_insert_with(|| UserRecord::new(user.clone()));
        record.info = user.clone();
        record.last_interaction = Utc::now();
        record.interaction_count += 1;
        log::debug!(
            "User {} ({:?}) interaction #{} at {}, registered {}",
            record.info.id,
            record.info.username,
            record.interaction_count,
            record.last_interaction,
            record.registered_at
        );
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StorageError> {
        let storage_guard = self.data.lock().await;
        Ok(storage_guard
            .get(&user_id)
            .map(|record| record.data.clone())
            .unwrap_or_default())
    }

    async fn set_value(
        &self,
        user_id: UserId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        let mut storage_guard = self.data.lock().await;
        storage_guard
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(UserInfo::new(user_id)))
            .data
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Profile storage that survives an unavailable database.
///
/// Every write lands in memory first and is then forwarded to the durable
/// store; reads prefer the durable store and fall back to the memory copy.
/// Errors from the durable store are logged, never returned.
#[derive(Clone)]
pub struct FallbackProfileStorage {
    durable: Option<Arc<dyn ProfileStorageTrait>>,
    memory: ProfileStorage,
}

impl FallbackProfileStorage {
    pub fn new(durable: Option<Arc<dyn ProfileStorageTrait>>) -> Self {
        Self {
            durable,
            memory: ProfileStorage::new(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }
}

#[async_trait::async_trait]
impl ProfileStorageTrait for FallbackProfileStorage {
    async fn record_interaction(&self, user: &UserInfo) -> Result<(), StorageError> {
        self.memory.record_interaction(user).await?;
        if let Some(durable) = &self.durable
            && let Err(e) = durable.record_interaction(user).await
        {
            log::error!("Failed to record interaction of user {}: {}", user.id, e);
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Profile, StorageError> {
        let Some(durable) = &self.durable else {
            return self.memory.get_profile(user_id).await;
        };
        match durable.get_profile(user_id).await {
            Ok(profile) => Ok(self.memory.refresh_from(user_id, profile).await),
            Err(e) => {
                log::warn!(
                    "Failed to read profile of user {}, using in-memory copy: {}",
                    user_id,
                    e
                );
                self.memory.get_profile(user_id).await
            }
        }
    }

    async fn set_value(
        &self,
        user_id: UserId,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        self.memory.set_value(user_id, key, value.clone()).await?;
        let Some(durable) = &self.durable else {
            return Ok(());
        };
        match durable.set_value(user_id, key, value).await {
            Ok(()) => self.memory.set_unsynced(user_id, key, false).await,
            Err(e) => {
                log::error!(
                    "Failed to save `{}` for user {}, keeping it in memory: {}",
                    key,
                    user_id,
                    e
                );
                self.memory.set_unsynced(user_id, key, true).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;

    /// Durable store stand-in that fails every call
    struct BrokenStorage;

    #[async_trait::async_trait]
    impl ProfileStorageTrait for BrokenStorage {
        async fn record_interaction(&self, _user: &UserInfo) -> Result<(), StorageError> {
            Err(StorageError::Database("connection refused".to_string()))
        }

        async fn get_profile(&self, _user_id: UserId) -> Result<Profile, StorageError> {
            Err(StorageError::Database("connection refused".to_string()))
        }

        async fn set_value(
            &self,
            _user_id: UserId,
            _key: &str,
            _value: Value,
        ) -> Result<(), StorageError> {
            Err(StorageError::Database("connection refused".to_string()))
        }
    }

    /// Durable store stand-in that reads fine but rejects writes while `fail_writes` is set
    struct ReadOnlyStorage {
        inner: ProfileStorage,
        fail_writes: AtomicBool,
    }

    impl ReadOnlyStorage {
        fn new() -> Self {
            Self {
                inner: ProfileStorage::new(),
                fail_writes: AtomicBool::new(true),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProfileStorageTrait for ReadOnlyStorage {
        async fn record_interaction(&self, user: &UserInfo) -> Result<(), StorageError> {
            self.inner.record_interaction(user).await
        }

        async fn get_profile(&self, user_id: UserId) -> Result<Profile, StorageError> {
            self.inner.get_profile(user_id).await
        }

        async fn set_value(
            &self,
            user_id: UserId,
            key: &str,
            value: Value,
        ) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Database("read-only transaction".to_string()));
            }
            self.inner.set_value(user_id, key, value).await
        }
    }

    #[tokio::test]
    async fn test_set_value_merges_single_key() {
        let storage = ProfileStorage::new();
        let user = UserId(10);

        storage.set_value(user, "name", json!("Анна")).await.unwrap();
        storage.set_value(user, "age", json!("17")).await.unwrap();
        storage.set_value(user, "age", json!("18")).await.unwrap();

        let profile = storage.get_profile(user).await.unwrap();
        assert_eq!(profile.get("name"), Some(&json!("Анна")));
        assert_eq!(profile.get("age"), Some(&json!("18")));
        assert_eq!(profile.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_has_empty_profile() {
        let storage = ProfileStorage::new();
        assert!(storage.get_profile(UserId(99)).await.unwrap().is_empty());
        assert_eq!(storage.interaction_count(UserId(99)).await, 0);
    }

    #[tokio::test]
    async fn test_record_interaction_counts() {
        let storage = ProfileStorage::new();
        let mut user = UserInfo::new(UserId(5));
        storage.record_interaction(&user).await.unwrap();
        user.first_name = Some("Иван".to_string());
        storage.record_interaction(&user).await.unwrap();

        assert_eq!(storage.interaction_count(UserId(5)).await, 2);
    }

    #[tokio::test]
    async fn test_fallback_survives_broken_durable_store() {
        let storage = FallbackProfileStorage::new(Some(Arc::new(BrokenStorage) as Arc<dyn ProfileStorageTrait>));
        let user = UserInfo::new(UserId(3));

        assert!(storage.is_durable());
        assert!(storage.record_interaction(&user).await.is_ok());
        assert!(storage.set_value(user.id, "email", json!("a@b.cd")).await.is_ok());

        let profile = storage.get_profile(user.id).await.unwrap();
        assert_eq!(profile.get("email"), Some(&json!("a@b.cd")));
    }

    #[tokio::test]
    async fn test_fallback_keeps_answer_when_only_write_fails() {
        let durable = Arc::new(ReadOnlyStorage::new());
        durable
            .inner
            .set_value(UserId(6), "city", json!("Казань"))
            .await
            .unwrap();
        let storage =
            FallbackProfileStorage::new(Some(durable.clone() as Arc<dyn ProfileStorageTrait>));

        storage
            .set_value(UserId(6), "email", json!("a@b.cd"))
            .await
            .unwrap();

        // Reading twice must not drop the unsaved answer on the second refresh
        for _ in 0..2 {
            let profile = storage.get_profile(UserId(6)).await.unwrap();
            assert_eq!(profile.get("email"), Some(&json!("a@b.cd")));
            assert_eq!(profile.get("city"), Some(&json!("Казань")));
        }
    }

    #[tokio::test]
    async fn test_fallback_durable_value_wins_after_successful_rewrite() {
        let durable = Arc::new(ReadOnlyStorage::new());
        let storage =
            FallbackProfileStorage::new(Some(durable.clone() as Arc<dyn ProfileStorageTrait>));

        storage
            .set_value(UserId(7), "age", json!("17"))
            .await
            .unwrap();
        durable.fail_writes.store(false, Ordering::SeqCst);
        storage
            .set_value(UserId(7), "age", json!("18"))
            .await
            .unwrap();

        // Once saved, the key follows the durable store again
        durable
            .inner
            .set_value(UserId(7), "age", json!("19"))
            .await
            .unwrap();
        let profile = storage.get_profile(UserId(7)).await.unwrap();
        assert_eq!(profile.get("age"), Some(&json!("19")));
    }

    #[tokio::test]
    async fn test_fallback_prefers_durable_reads() {
        let durable = Arc::new(ProfileStorage::new());
        durable
            .set_value(UserId(4), "city", json!("Казань"))
            .await
            .unwrap();
        let storage = FallbackProfileStorage::new(Some(durable.clone() as Arc<dyn ProfileStorageTrait>));

        let profile = storage.get_profile(UserId(4)).await.unwrap();
        assert_eq!(profile.get("city"), Some(&json!("Казань")));

        storage
            .set_value(UserId(4), "age", json!("30"))
            .await
            .unwrap();
        let durable_profile = durable.get_profile(UserId(4)).await.unwrap();
        assert_eq!(durable_profile.get("age"), Some(&json!("30")));
        assert_eq!(durable_profile.get("city"), Some(&json!("Казань")));
    }
}
