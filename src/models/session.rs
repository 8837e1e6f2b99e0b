use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SessionError};

/// Represents a user session.
///
/// `id` is the raw cookie value. It is never serialized into the encrypted
/// payload and never used as a storage key: the store only sees the keyed
/// hash of it (the private ID).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The cookie value. Filled in by the provider.
    #[serde(skip)]
    pub id: String,
    /// Stable identifier exposed to device listing and remote logout.
    pub public_id: String,
    /// Stable identifier that survives session ID regeneration.
    pub internal_id: String,
    /// The user this session belongs to, once known.
    pub username: Option<String>,
    /// Opaque application state.
    pub data: Vec<u8>,
}

impl Session {
    /// Creates an unsaved session with fresh public and internal IDs.
    pub fn new(username: Option<String>) -> Self {
        Self {
            id: String::new(),
            public_id: Uuid::new_v4().to_string(),
            internal_id: Uuid::new_v4().to_string(),
            username,
            data: Vec::new(),
        }
    }

    /// Replaces `data` with the compact binary encoding of `state`.
    pub fn put_state<T: Serialize>(&mut self, state: &T) -> Result<()> {
        self.data = bincode::serde::encode_to_vec(state, bincode::config::standard())
            .map_err(|e| SessionError::Serialization(format!("Session state encoding failed: {}", e)))?;
        Ok(())
    }

    /// Decodes `data` as application state.
    pub fn state<T: DeserializeOwned>(&self) -> Result<T> {
        let (state, _) = bincode::serde::decode_from_slice(&self.data, bincode::config::standard())
            .map_err(|e| SessionError::Serialization(format!("Session state decoding failed: {}", e)))?;
        Ok(state)
    }
}

/// Identifies a stored session for administrative flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeys {
    /// Keyed hash of the session ID; the storage lookup key.
    pub private_id: String,
    /// See [`Session::public_id`].
    pub public_id: String,
    /// See [`Session::internal_id`].
    pub internal_id: String,
    /// When the store will consider the record expired.
    pub expires_at: DateTime<Utc>,
}
