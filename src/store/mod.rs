//! The persistence contract the session provider depends on, plus the
//! in-memory and Redis implementations.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::models::session::SessionKeys;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Seconds a private ID stays resolvable after the session was regenerated,
/// so requests already in flight with the old cookie still succeed.
pub const REGENERATE_GRACE_SECS: i64 = 10;

/// When a private ID replaced at `now` stops resolving.
pub fn regenerate_grace_deadline(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> DateTime<Utc> {
    (now + Duration::seconds(REGENERATE_GRACE_SECS)).min(expires_at)
}

/// A sealed session as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Keyed hash of the session ID.
    pub private_id: String,
    /// Sealed payload.
    pub data: Vec<u8>,
    pub public_id: String,
    pub internal_id: String,
    /// Indexed so a user's sessions can be enumerated.
    pub username: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Durable storage for sealed sessions.
///
/// Lookups never return expired records, whether or not they were reaped.
/// Request-scoped calls are cancelled by dropping the returned future.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetches a sealed session by its private ID.
    async fn get_session_by_private_id(&self, private_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fetches a sealed session by its public ID.
    async fn get_session_by_public_id(&self, public_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fetches a sealed session by its internal ID.
    async fn get_session_by_internal_id(&self, internal_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Lists the live sessions saved for `username`.
    async fn get_session_ids_by_username(&self, username: &str) -> Result<Vec<SessionKeys>, StoreError>;

    /// Inserts or replaces a session.
    async fn save_session(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Removes a session. Removing a session that is already gone succeeds.
    async fn destroy_session(
        &self,
        private_id: &str,
        public_id: &str,
        internal_id: &str,
    ) -> Result<(), StoreError>;

    /// Moves a session to a new private ID. The old private ID stays
    /// readable for [`REGENERATE_GRACE_SECS`].
    async fn regenerate_session(
        &self,
        old_private_id: &str,
        new_private_id: &str,
        public_id: &str,
        internal_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Number of live sessions.
    async fn count_sessions(&self) -> Result<usize, StoreError>;

    /// Whether records must be reaped by [`SessionStore::session_gc`]
    /// because the backend does not expire them itself.
    fn need_session_gc(&self) -> bool;

    /// Reaps expired records and returns how many were removed.
    async fn session_gc(&self) -> Result<usize, StoreError>;
}
