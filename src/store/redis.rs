use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::session::SessionKeys;

use super::{regenerate_grace_deadline, SessionRecord, SessionStore};

const KEY_PREFIX: &str = "warden:session";

/// The value stored under a private ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    data: Vec<u8>,
    public_id: String,
    internal_id: String,
    username: Option<String>,
    expires_at_ms: i64,
    superseded: bool,
}

impl StoredRecord {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(raw: &[u8]) -> Result<Self, StoreError> {
        bincode::serde::decode_from_slice(raw, bincode::config::standard())
            .map(|(record, _)| record)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_at_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn private_key(private_id: &str) -> String {
    format!("{}:private:{}", KEY_PREFIX, private_id)
}

fn public_key(public_id: &str) -> String {
    format!("{}:public:{}", KEY_PREFIX, public_id)
}

fn internal_key(internal_id: &str) -> String {
    format!("{}:internal:{}", KEY_PREFIX, internal_id)
}

/// Private IDs an internal ID was regenerated away from.
fn generations_key(internal_id: &str) -> String {
    format!("{}:internal:{}:generations", KEY_PREFIX, internal_id)
}

fn user_key(username: &str) -> String {
    format!("{}:user:{}", KEY_PREFIX, username)
}

fn expiry_key() -> String {
    format!("{}:expiry", KEY_PREFIX)
}

/// Milliseconds until `at`, never less than one so `PX` stays valid.
fn ttl_ms(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (at - now).num_milliseconds().max(1)
}

/// A session store backed by Redis.
///
/// Every key carries a `PX` TTL, so Redis expires records on its own and
/// no garbage collection is needed.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to the Redis server at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL of the Redis server.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `RedisStore`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis session store connected");
        Ok(Self { conn })
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn record(&self, private_id: &str) -> Result<Option<StoredRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(private_key(private_id))
            .query_async(&mut conn)
            .await?;

        raw.map(|raw| StoredRecord::decode(&raw)).transpose()
    }

    async fn resolve(&self, index_key: String) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let private_id: Option<String> = ::redis::cmd("GET")
            .arg(index_key)
            .query_async(&mut conn)
            .await?;
        Ok(private_id)
    }

    async fn data_via_index(&self, index_key: String) -> Result<Option<Vec<u8>>, StoreError> {
        match self.resolve(index_key).await? {
            Some(private_id) => self.get_session_by_private_id(&private_id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get_session_by_private_id(&self, private_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Utc::now();
        Ok(self
            .record(private_id)
            .await?
            .filter(|record| record.expires_at() > now)
            .map(|record| record.data))
    }

    async fn get_session_by_public_id(&self, public_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.data_via_index(public_key(public_id)).await
    }

    async fn get_session_by_internal_id(&self, internal_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.data_via_index(internal_key(internal_id)).await
    }

    async fn get_session_ids_by_username(&self, username: &str) -> Result<Vec<SessionKeys>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(user_key(username))
            .query_async(&mut conn)
            .await?;

        let now = Utc::now();
        let mut keys = Vec::with_capacity(members.len());
        let mut stale = Vec::new();

        for private_id in members {
            match self.record(&private_id).await? {
                Some(record) if record.expires_at() > now => {
                    if !record.superseded {
                        keys.push(SessionKeys {
                            expires_at: record.expires_at(),
                            private_id,
                            public_id: record.public_id,
                            internal_id: record.internal_id,
                        });
                    }
                }
                _ => stale.push(private_id),
            }
        }

        if !stale.is_empty() {
            let _: () = ::redis::cmd("SREM")
                .arg(user_key(username))
                .arg(&stale)
                .query_async(&mut conn)
                .await?;
        }

        keys.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(keys)
    }

    async fn save_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        if self.record(&record.private_id).await?.is_some_and(|existing| existing.superseded) {
            return Err(StoreError::NotFound);
        }

        let now = Utc::now();
        let ttl = ttl_ms(record.expires_at, now);

        let stored = StoredRecord {
            data: record.data,
            public_id: record.public_id,
            internal_id: record.internal_id,
            username: record.username,
            expires_at_ms: record.expires_at.timestamp_millis(),
            superseded: false,
        };

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .cmd("SET").arg(private_key(&record.private_id)).arg(stored.encode()?).arg("PX").arg(ttl).ignore()
            .cmd("SET").arg(public_key(&stored.public_id)).arg(&record.private_id).arg("PX").arg(ttl).ignore()
            .cmd("SET").arg(internal_key(&stored.internal_id)).arg(&record.private_id).arg("PX").arg(ttl).ignore()
            .cmd("ZADD").arg(expiry_key()).arg(stored.expires_at_ms).arg(&record.private_id).ignore();

        if let Some(username) = &stored.username {
            pipe.cmd("SADD").arg(user_key(username)).arg(&record.private_id).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!("Session saved to Redis (ttl {} ms)", ttl);
        Ok(())
    }

    async fn destroy_session(
        &self,
        private_id: &str,
        public_id: &str,
        internal_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let generations: Vec<String> = ::redis::cmd("SMEMBERS")
            .arg(generations_key(internal_id))
            .query_async(&mut conn)
            .await?;

        let mut private_ids = vec![private_id.to_string()];
        for id in generations {
            if !private_ids.contains(&id) {
                private_ids.push(id);
            }
        }
        for index_key in [public_key(public_id), internal_key(internal_id)] {
            if let Some(id) = self.resolve(index_key).await? {
                if !private_ids.contains(&id) {
                    private_ids.push(id);
                }
            }
        }

        let mut pipe = ::redis::pipe();
        pipe.atomic();

        for id in &private_ids {
            if let Some(record) = self.record(id).await? {
                if let Some(username) = &record.username {
                    pipe.cmd("SREM").arg(user_key(username)).arg(id).ignore();
                }
            }
            pipe.cmd("DEL").arg(private_key(id)).ignore();
            pipe.cmd("ZREM").arg(expiry_key()).arg(id).ignore();
        }

        pipe.cmd("DEL").arg(public_key(public_id)).ignore();
        pipe.cmd("DEL").arg(internal_key(internal_id)).ignore();
        pipe.cmd("DEL").arg(generations_key(internal_id)).ignore();

        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!("Session destroyed in Redis ({} generations)", private_ids.len());
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
        let now = Utc::now();

        let current = self
            .record(old_private_id)
            .await?
            .filter(|record| !record.superseded && record.expires_at() > now)
            .ok_or(StoreError::NotFound)?;

        let grace_until = regenerate_grace_deadline(now, current.expires_at());

        let mut old = current.clone();
        old.superseded = true;
        old.expires_at_ms = grace_until.timestamp_millis();

        let fresh = StoredRecord {
            public_id: public_id.to_string(),
            internal_id: internal_id.to_string(),
            expires_at_ms: expires_at.timestamp_millis(),
            superseded: false,
            ..current
        };

        let ttl = ttl_ms(expires_at, now);
        let grace_ttl = ttl_ms(grace_until, now);

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .cmd("SET").arg(private_key(new_private_id)).arg(fresh.encode()?).arg("PX").arg(ttl).ignore()
            .cmd("SET").arg(private_key(old_private_id)).arg(old.encode()?).arg("PX").arg(grace_ttl).ignore()
            .cmd("SET").arg(public_key(public_id)).arg(new_private_id).arg("PX").arg(ttl).ignore()
            .cmd("SET").arg(internal_key(internal_id)).arg(new_private_id).arg("PX").arg(ttl).ignore()
            .cmd("SADD").arg(generations_key(internal_id)).arg(old_private_id).ignore()
            .cmd("PEXPIRE").arg(generations_key(internal_id)).arg(ttl).ignore()
            .cmd("ZREM").arg(expiry_key()).arg(old_private_id).ignore()
            .cmd("ZADD").arg(expiry_key()).arg(fresh.expires_at_ms).arg(new_private_id).ignore();

        if let Some(username) = &fresh.username {
            pipe.cmd("SREM").arg(user_key(username)).arg(old_private_id).ignore();
            pipe.cmd("SADD").arg(user_key(username)).arg(new_private_id).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn count_sessions(&self) -> Result<usize, StoreError> {
        let now_ms = Utc::now().timestamp_millis();

        let mut conn = self.conn.clone();
        let (_, count): (i64, usize) = ::redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE").arg(expiry_key()).arg("-inf").arg(now_ms)
            .cmd("ZCARD").arg(expiry_key())
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    fn need_session_gc(&self) -> bool {
        false
    }

    async fn session_gc(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_key_layout() {
        assert_eq!(private_key("abc"), "warden:session:private:abc");
        assert_eq!(public_key("p"), "warden:session:public:p");
        assert_eq!(internal_key("i"), "warden:session:internal:i");
        assert_eq!(user_key("alice"), "warden:session:user:alice");
        assert_eq!(expiry_key(), "warden:session:expiry");
        assert_eq!(generations_key("i"), "warden:session:internal:i:generations");
    }

    #[test]
    fn test_ttl_is_never_zero() {
        let now = Utc::now();
        assert_eq!(ttl_ms(now - Duration::seconds(5), now), 1);
        assert_eq!(ttl_ms(now + Duration::seconds(2), now), 2000);
    }

    #[test]
    fn test_stored_record_round_trip() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let record = StoredRecord {
            data: vec![1, 2, 3],
            public_id: "pub".to_string(),
            internal_id: "int".to_string(),
            username: Some("alice".to_string()),
            expires_at_ms: at.timestamp_millis(),
            superseded: false,
        };

        let decoded = StoredRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.data, vec![1, 2, 3]);
        assert_eq!(decoded.expires_at(), at);
        assert!(StoredRecord::decode(&[0xff]).is_err());
    }

    // Requires a Redis server on 127.0.0.1:6380.
    #[tokio::test]
    #[ignore]
    async fn test_redis_store_lifecycle() {
        let store = RedisStore::connect("redis://127.0.0.1:6380/").await.unwrap();
        assert!(!store.need_session_gc());

        let record = SessionRecord {
            private_id: "it-sum1".to_string(),
            data: b"blob".to_vec(),
            public_id: "it-pub1".to_string(),
            internal_id: "it-int1".to_string(),
            username: Some("it-alice".to_string()),
            expires_at: Utc::now() + Duration::minutes(5),
        };
        store.save_session(record).await.unwrap();

        assert_eq!(store.get_session_by_public_id("it-pub1").await.unwrap(), Some(b"blob".to_vec()));

        store
            .regenerate_session("it-sum1", "it-sum2", "it-pub1", "it-int1", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        let keys = store.get_session_ids_by_username("it-alice").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].private_id, "it-sum2");

        // The old private ID is readable during the grace window but can
        // no longer be written.
        assert!(store.get_session_by_private_id("it-sum1").await.unwrap().is_some());
        let rewrite = SessionRecord {
            private_id: "it-sum1".to_string(),
            data: b"stale".to_vec(),
            public_id: "it-pub1".to_string(),
            internal_id: "it-int1".to_string(),
            username: Some("it-alice".to_string()),
            expires_at: Utc::now() + Duration::minutes(5),
        };
        assert!(matches!(store.save_session(rewrite).await, Err(StoreError::NotFound)));
        assert_eq!(store.count_sessions().await.unwrap(), 1);

        store.destroy_session("it-sum2", "it-pub1", "it-int1").await.unwrap();
        store.destroy_session("it-sum2", "it-pub1", "it-int1").await.unwrap();
        assert_eq!(store.get_session_by_internal_id("it-int1").await.unwrap(), None);
        assert_eq!(store.get_session_by_private_id("it-sum2").await.unwrap(), None);
        // Destroy removes every generation, not only the one indexes point at.
        assert_eq!(store.get_session_by_private_id("it-sum1").await.unwrap(), None);
    }
}
