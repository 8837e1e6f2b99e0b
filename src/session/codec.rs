use std::sync::{Arc, Mutex};

use aes_gcm::Aes256Gcm;
use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::aes::{self, SecureKey, NONCE_SIZE};
use crate::crypto::hmac::HmacPool;
use crate::crypto::random::RandomSource;
use crate::error::{Result, SessionError};

/// Turns session identifiers into storage keys and session values into
/// authenticated ciphertext.
///
/// Blob layout: `nonce (12) || ciphertext || tag (16)`.
pub struct SessionCodec {
    random: Arc<dyn RandomSource>,
    cipher: Aes256Gcm,
    hashers: HmacPool,
    buffer: Mutex<Vec<u8>>,
}

impl SessionCodec {
    /// Creates a new `SessionCodec`.
    ///
    /// # Arguments
    ///
    /// * `random` - Source of nonces.
    /// * `key_material` - Encryption key of any length; hashed to 256 bits.
    /// * `secret` - HMAC key used to derive private IDs.
    ///
    /// # Returns
    ///
    /// A `Result` containing the codec, or a configuration error.
    pub fn new(random: Arc<dyn RandomSource>, key_material: &[u8], secret: &[u8]) -> Result<Self> {
        let key = SecureKey::derive(key_material)?;

        Ok(Self {
            random,
            cipher: aes::cipher(&key),
            hashers: HmacPool::new(secret)?,
            buffer: Mutex::new(Vec::with_capacity(256)),
        })
    }

    /// Keyed hash of a session ID. This is the only value used to look up
    /// a private session record.
    pub fn sum(&self, id: &[u8]) -> String {
        self.hashers.sum(id)
    }

    /// Lookup key for an existing session without touching its payload.
    pub fn encode_session_id(&self, id: &[u8]) -> String {
        let _guard = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.sum(id)
    }

    /// Serializes and seals `value`.
    ///
    /// # Arguments
    ///
    /// * `id` - The raw session ID.
    /// * `value` - The value to protect.
    ///
    /// # Returns
    ///
    /// The private ID for `id` and the sealed blob.
    pub fn encode<T: Serialize>(&self, id: &[u8], value: &T) -> Result<(String, Vec<u8>)> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.clear();

        bincode::serde::encode_into_std_write(value, &mut *buffer, bincode::config::standard())
            .map_err(|e| SessionError::Serialization(format!("Session encoding failed: {}", e)))?;

        let mut nonce = [0u8; NONCE_SIZE];
        self.random.read(&mut nonce)?;

        let sealed = aes::seal(&self.cipher, &nonce, &buffer)?;
        buffer.clear();

        Ok((self.sum(id), sealed))
    }

    /// Opens a blob produced by [`SessionCodec::encode`] and deserializes it.
    ///
    /// Fails on short input, on a tag that does not verify, and on a
    /// plaintext that is not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(&self, sealed: &[u8]) -> Result<T> {
        let plaintext = aes::open(&self.cipher, sealed)?;

        let (value, _) = bincode::serde::decode_from_slice(&plaintext, bincode::config::standard())
            .map_err(|e| SessionError::Serialization(format!("Session decoding failed: {}", e)))?;

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random::{CryptoRandom, SeededRandom, CHARSET_ALPHANUMERIC};
    use crate::models::session::Session;

    fn codec() -> SessionCodec {
        SessionCodec::new(Arc::new(CryptoRandom), b"an encryption key", b"a hashing secret").unwrap()
    }

    fn sample_session() -> Session {
        Session {
            id: String::new(),
            public_id: "pub1".to_string(),
            internal_id: "int1".to_string(),
            username: None,
            data: b"x".to_vec(),
        }
    }

    #[test]
    fn test_same_id_same_sum_fresh_nonce() {
        let codec = codec();
        let id = SeededRandom::new(1).bytes_custom(32, CHARSET_ALPHANUMERIC).unwrap();

        let (sum_a, ct_a) = codec.encode(&id, &sample_session()).unwrap();
        let (sum_b, ct_b) = codec.encode(&id, &sample_session()).unwrap();

        assert_eq!(sum_a, sum_b);
        assert_ne!(ct_a, ct_b);

        let a: Session = codec.decode(&ct_a).unwrap();
        let b: Session = codec.decode(&ct_b).unwrap();
        assert_eq!(a.data, b"x");
        assert_eq!(b.data, b"x");
        assert_eq!(a.public_id, "pub1");
    }

    #[test]
    fn test_round_trip_preserves_value() {
        let codec = codec();
        let session = Session {
            username: Some("john".to_string()),
            data: (0u8..=255).collect(),
            ..sample_session()
        };

        let (_, sealed) = codec.encode(b"id", &session).unwrap();
        let decoded: Session = codec.decode(&sealed).unwrap();

        assert_eq!(decoded, session);
    }

    #[test]
    fn test_sum_is_not_the_id() {
        let codec = codec();
        let id = "AbCdEfGhIjKlMnOpQrStUvWxYz012345";

        let sum = codec.sum(id.as_bytes());

        assert!(!sum.contains(id));
        assert_eq!(sum, codec.encode_session_id(id.as_bytes()));
        assert_ne!(sum, codec.sum(b"AbCdEfGhIjKlMnOpQrStUvWxYz012346"));
    }

    #[test]
    fn test_every_bit_flip_is_rejected() {
        let codec = codec();
        let (_, sealed) = codec.encode(b"id", &sample_session()).unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    codec.decode::<Session>(&tampered).is_err(),
                    "flip of bit {} in byte {} was accepted",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_short_input_is_rejected() {
        let codec = codec();
        assert!(matches!(codec.decode::<Session>(&[]), Err(SessionError::Crypto(_))));
        assert!(matches!(
            codec.decode::<Session>(&[0u8; NONCE_SIZE - 1]),
            Err(SessionError::Crypto(_))
        ));
    }

    #[test]
    fn test_other_key_cannot_decode() {
        let other = SessionCodec::new(Arc::new(CryptoRandom), b"another key", b"a hashing secret").unwrap();
        let (_, sealed) = codec().encode(b"id", &sample_session()).unwrap();

        assert!(other.decode::<Session>(&sealed).is_err());
    }

    #[test]
    fn test_wrong_shape_is_serialization_error() {
        let codec = codec();
        let (_, sealed) = codec.encode(b"id", &7u8).unwrap();

        assert!(matches!(
            codec.decode::<Session>(&sealed),
            Err(SessionError::Serialization(_))
        ));
    }

    #[test]
    fn test_empty_secrets_fail_construction() {
        assert!(SessionCodec::new(Arc::new(CryptoRandom), b"", b"secret").is_err());
        assert!(SessionCodec::new(Arc::new(CryptoRandom), b"key", b"").is_err());
    }
}
