use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::session::SessionKeys;

use super::{regenerate_grace_deadline, SessionRecord, SessionStore};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    public_id: String,
    internal_id: String,
    username: Option<String>,
    expires_at: DateTime<Utc>,
    /// Replaced by a regeneration; readable by private ID until it expires.
    superseded: bool,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Entry>,
    by_public: HashMap<String, String>,
    by_internal: HashMap<String, String>,
    by_username: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn live(&self, private_id: &str, now: DateTime<Utc>) -> Option<&Entry> {
        self.records.get(private_id).filter(|entry| entry.is_live(now))
    }

    fn index(&mut self, private_id: &str, entry: &Entry) {
        self.by_public.insert(entry.public_id.clone(), private_id.to_string());
        self.by_internal.insert(entry.internal_id.clone(), private_id.to_string());
        if let Some(username) = &entry.username {
            self.by_username
                .entry(username.clone())
                .or_default()
                .insert(private_id.to_string());
        }
    }

    fn remove(&mut self, private_id: &str) -> Option<Entry> {
        let entry = self.records.remove(private_id)?;

        if self.by_public.get(&entry.public_id).map(String::as_str) == Some(private_id) {
            self.by_public.remove(&entry.public_id);
        }
        if self.by_internal.get(&entry.internal_id).map(String::as_str) == Some(private_id) {
            self.by_internal.remove(&entry.internal_id);
        }
        if let Some(username) = &entry.username {
            if let Some(ids) = self.by_username.get_mut(username) {
                ids.remove(private_id);
                if ids.is_empty() {
                    self.by_username.remove(username);
                }
            }
        }

        Some(entry)
    }
}

/// A session store held in process memory.
///
/// Records are not expired by the backend, so the provider must run the
/// garbage collector against it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        tracing::info!("Creating new in-memory session store");
        Self::default()
    }

    async fn lookup(&self, index: fn(&Inner) -> &HashMap<String, String>, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        let private_id = index(&inner).get(key)?;
        inner.live(private_id, Utc::now()).map(|entry| entry.data.clone())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session_by_private_id(&self, private_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.live(private_id, Utc::now()).map(|entry| entry.data.clone()))
    }

    async fn get_session_by_public_id(&self, public_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lookup(|inner| &inner.by_public, public_id).await)
    }

    async fn get_session_by_internal_id(&self, internal_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lookup(|inner| &inner.by_internal, internal_id).await)
    }

    async fn get_session_ids_by_username(&self, username: &str) -> Result<Vec<SessionKeys>, StoreError> {
        let inner = self.inner.read().await;
        let now = Utc::now();

        let mut keys: Vec<SessionKeys> = inner
            .by_username
            .get(username)
            .into_iter()
            .flatten()
            .filter_map(|private_id| {
                inner
                    .live(private_id, now)
                    .filter(|entry| !entry.superseded)
                    .map(|entry| SessionKeys {
                        private_id: private_id.clone(),
                        public_id: entry.public_id.clone(),
                        internal_id: entry.internal_id.clone(),
                        expires_at: entry.expires_at,
                    })
            })
            .collect();

        keys.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(keys)
    }

    async fn save_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        // A regenerated-away private ID only serves reads until its grace
        // deadline; it never becomes writable again.
        if inner.records.get(&record.private_id).is_some_and(|entry| entry.superseded) {
            return Err(StoreError::NotFound);
        }

        // Drops stale username and index links if the record is replaced.
        inner.remove(&record.private_id);

        let entry = Entry {
            data: record.data,
            public_id: record.public_id,
            internal_id: record.internal_id,
            username: record.username,
            expires_at: record.expires_at,
            superseded: false,
        };

        inner.index(&record.private_id, &entry);
        inner.records.insert(record.private_id, entry);
        Ok(())
    }

    async fn destroy_session(
        &self,
        private_id: &str,
        public_id: &str,
        internal_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        let mut doomed: HashSet<String> = inner
            .records
            .iter()
            .filter(|(_, entry)| entry.internal_id == internal_id || entry.public_id == public_id)
            .map(|(id, _)| id.clone())
            .collect();
        doomed.insert(private_id.to_string());

        for id in &doomed {
            inner.remove(id);
        }
        inner.by_public.remove(public_id);
        inner.by_internal.remove(internal_id);

        Ok(())
    }

    async fn regenerate_session(
        &self,
        old_private_id: &str,
        new_private_id: &str,
        public_id: &str,
        internal_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let current = inner
            .live(old_private_id, now)
            .filter(|entry| !entry.superseded)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let fresh = Entry {
            public_id: public_id.to_string(),
            internal_id: internal_id.to_string(),
            expires_at,
            superseded: false,
            ..current.clone()
        };

        if let Some(old) = inner.records.get_mut(old_private_id) {
            old.superseded = true;
            old.expires_at = regenerate_grace_deadline(now, current.expires_at);
        }

        inner.remove(new_private_id);
        inner.index(new_private_id, &fresh);
        inner.records.insert(new_private_id.to_string(), fresh);

        Ok(())
    }

    async fn count_sessions(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        let now = Utc::now();

        Ok(inner
            .records
            .values()
            .filter(|entry| entry.is_live(now) && !entry.superseded)
            .count())
    }

    fn need_session_gc(&self) -> bool {
        true
    }

    async fn session_gc(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let expired: Vec<String> = inner
            .records
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            inner.remove(id);
        }

        if !expired.is_empty() {
            tracing::debug!("Reaped {} expired sessions from memory", expired.len());
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(private_id: &str, public_id: &str, internal_id: &str, ttl: Duration) -> SessionRecord {
        SessionRecord {
            private_id: private_id.to_string(),
            data: format!("blob-{}", private_id).into_bytes(),
            public_id: public_id.to_string(),
            internal_id: internal_id.to_string(),
            username: Some("alice".to_string()),
            expires_at: Utc::now() + ttl,
        }
    }

    #[tokio::test]
    async fn test_save_and_lookup_by_every_key() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await.unwrap();

        let expected = Some(b"blob-sum1".to_vec());
        assert_eq!(store.get_session_by_private_id("sum1").await.unwrap(), expected);
        assert_eq!(store.get_session_by_public_id("pub1").await.unwrap(), expected);
        assert_eq!(store.get_session_by_internal_id("int1").await.unwrap(), expected);
        assert_eq!(store.get_session_by_private_id("nope").await.unwrap(), None);
        assert_eq!(store.count_sessions().await.unwrap(), 1);

        let keys = store.get_session_ids_by_username("alice").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].private_id, "sum1");
        assert_eq!(keys[0].public_id, "pub1");
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden_before_gc() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::seconds(-1))).await.unwrap();

        assert_eq!(store.get_session_by_private_id("sum1").await.unwrap(), None);
        assert_eq!(store.get_session_by_public_id("pub1").await.unwrap(), None);
        assert_eq!(store.count_sessions().await.unwrap(), 0);
        assert!(store.get_session_ids_by_username("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gc_reaps_only_expired() {
        let store = MemoryStore::new();
        store.save_session(record("old", "pub-old", "int-old", Duration::seconds(-5))).await.unwrap();
        store.save_session(record("new", "pub-new", "int-new", Duration::hours(1))).await.unwrap();

        assert!(store.need_session_gc());
        assert_eq!(store.session_gc().await.unwrap(), 1);
        assert_eq!(store.session_gc().await.unwrap(), 0);
        assert_eq!(store.count_sessions().await.unwrap(), 1);
        assert!(store.get_session_by_private_id("new").await.unwrap().is_some());

        let inner = store.inner.read().await;
        assert!(!inner.by_public.contains_key("pub-old"));
        assert!(!inner.by_internal.contains_key("int-old"));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await.unwrap();

        store.destroy_session("sum1", "pub1", "int1").await.unwrap();
        store.destroy_session("sum1", "pub1", "int1").await.unwrap();

        assert_eq!(store.get_session_by_private_id("sum1").await.unwrap(), None);
        assert_eq!(store.get_session_by_internal_id("int1").await.unwrap(), None);
        assert_eq!(store.count_sessions().await.unwrap(), 0);
        assert!(store.get_session_ids_by_username("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_moves_record_and_keeps_grace_entry() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await.unwrap();

        let expires_at = Utc::now() + Duration::hours(2);
        store
            .regenerate_session("sum1", "sum2", "pub1", "int1", expires_at)
            .await
            .unwrap();

        // The new private ID resolves, and the indexes follow it.
        assert_eq!(
            store.get_session_by_private_id("sum2").await.unwrap(),
            Some(b"blob-sum1".to_vec())
        );
        let keys = store.get_session_ids_by_username("alice").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].private_id, "sum2");
        assert_eq!(keys[0].expires_at, expires_at);
        assert_eq!(store.count_sessions().await.unwrap(), 1);

        // The old private ID is still readable during the grace window.
        assert!(store.get_session_by_private_id("sum1").await.unwrap().is_some());
        let inner = store.inner.read().await;
        let old = inner.records.get("sum1").unwrap();
        assert!(old.superseded);
        assert!(old.expires_at <= Utc::now() + Duration::seconds(super::super::REGENERATE_GRACE_SECS));
    }

    #[tokio::test]
    async fn test_save_to_superseded_id_is_refused() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::milliseconds(300))).await.unwrap();
        store
            .regenerate_session("sum1", "sum2", "pub1", "int1", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let result = store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await;
        assert!(matches!(result, Err(StoreError::NotFound)));

        assert_eq!(store.count_sessions().await.unwrap(), 1);
        let keys = store.get_session_ids_by_username("alice").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].private_id, "sum2");
        {
            let inner = store.inner.read().await;
            assert_eq!(inner.by_public.get("pub1").map(String::as_str), Some("sum2"));
            assert_eq!(inner.by_internal.get("int1").map(String::as_str), Some("sum2"));
            assert!(inner.records.get("sum1").unwrap().superseded);
        }

        // The grace deadline was capped at the old record's expiry and the
        // refused write did not extend it.
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(store.get_session_by_private_id("sum1").await.unwrap(), None);
        assert!(store.get_session_by_private_id("sum2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_regenerate_twice_from_same_old_id_fails() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await.unwrap();

        let expires_at = Utc::now() + Duration::hours(1);
        store.regenerate_session("sum1", "sum2", "pub1", "int1", expires_at).await.unwrap();

        assert!(matches!(
            store.regenerate_session("sum1", "sum3", "pub1", "int1", expires_at).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_regenerate_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .regenerate_session("missing", "sum2", "pub1", "int1", Utc::now() + Duration::hours(1))
            .await;

        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_destroy_after_regenerate_removes_every_generation() {
        let store = MemoryStore::new();
        store.save_session(record("sum1", "pub1", "int1", Duration::hours(1))).await.unwrap();
        store
            .regenerate_session("sum1", "sum2", "pub1", "int1", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        store.destroy_session("sum2", "pub1", "int1").await.unwrap();

        assert_eq!(store.get_session_by_private_id("sum1").await.unwrap(), None);
        assert_eq!(store.get_session_by_private_id("sum2").await.unwrap(), None);
    }
}
