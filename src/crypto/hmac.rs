use std::sync::Mutex;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SessionError};

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on idle hashers kept for reuse.
const MAX_POOLED: usize = 64;

/// A pool of HMAC-SHA256 instances keyed with one secret.
///
/// Each call acquires an instance, writes the input, finalizes, resets and
/// hands the instance back. Instances never leave [`HmacPool::sum`].
pub struct HmacPool {
    prototype: HmacSha256,
    idle: Mutex<Vec<HmacSha256>>,
}

impl HmacPool {
    /// Creates a pool keyed with `secret`.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(SessionError::Config("session secret must not be empty".to_string()));
        }

        let prototype = HmacSha256::new_from_slice(secret)
            .map_err(|e| SessionError::Config(format!("HMAC key rejected: {}", e)))?;

        Ok(Self {
            prototype,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Computes the lowercase hex HMAC-SHA256 of `input`.
    pub fn sum(&self, input: &[u8]) -> String {
        let mut mac = self.acquire();
        mac.update(input);
        let digest = mac.finalize_reset().into_bytes();
        self.release(mac);

        hex::encode(digest)
    }

    fn acquire(&self) -> HmacSha256 {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_else(|| self.prototype.clone())
    }

    fn release(&self, mac: HmacSha256) {
        let mut idle = self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_POOLED {
            idle.push(mac);
        }
    }

    #[cfg(test)]
    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}
