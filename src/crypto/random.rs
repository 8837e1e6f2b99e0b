use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::RandomError;

/// Upper and lower case ASCII letters plus digits.
pub const CHARSET_ALPHANUMERIC: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Alphanumerics without the glyphs that are easy to confuse (`0 O 1 I l`).
pub const CHARSET_ALPHANUMERIC_UNAMBIGUOUS: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Length of the value returned by [`RandomSource::bytes`].
pub const DEFAULT_RANDOM_LENGTH: usize = 72;

/// A source of random bytes.
///
/// Production code must use [`CryptoRandom`]. Every provided method draws
/// its entropy through [`RandomSource::read`], so an implementation only has
/// to supply that.
pub trait RandomSource: Send + Sync {
    /// Fills `buf` completely and returns the number of bytes written.
    fn read(&self, buf: &mut [u8]) -> Result<usize, RandomError>;

    /// Returns [`DEFAULT_RANDOM_LENGTH`] alphanumeric bytes.
    fn bytes(&self) -> Result<Vec<u8>, RandomError> {
        self.bytes_custom(DEFAULT_RANDOM_LENGTH, CHARSET_ALPHANUMERIC)
    }

    /// Returns `n` bytes drawn uniformly from `charset`.
    ///
    /// Raw bytes that would bias the selection are discarded and redrawn.
    fn bytes_custom(&self, n: usize, charset: &[u8]) -> Result<Vec<u8>, RandomError> {
        if charset.is_empty() || charset.len() > 256 {
            return Err(RandomError(format!(
                "charset length must be between 1 and 256, got {}",
                charset.len()
            )));
        }

        let len = charset.len();
        let limit = 256 - (256 % len);
        let mut out = Vec::with_capacity(n);
        let mut chunk = [0u8; 64];

        while out.len() < n {
            self.read(&mut chunk)?;
            for &b in chunk.iter() {
                if (b as usize) < limit {
                    out.push(charset[b as usize % len]);
                    if out.len() == n {
                        break;
                    }
                }
            }
        }

        Ok(out)
    }

    /// Same as [`RandomSource::bytes_custom`], as a `String`.
    fn string_custom(&self, n: usize, charset: &[u8]) -> Result<String, RandomError> {
        let bytes = self.bytes_custom(n, charset)?;
        String::from_utf8(bytes).map_err(|_| RandomError("charset is not valid UTF-8".to_string()))
    }
}

/// Random source backed by the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoRandom;

impl RandomSource for CryptoRandom {
    fn read(&self, buf: &mut [u8]) -> Result<usize, RandomError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| RandomError(format!("OS entropy read failed: {}", e)))?;
        Ok(buf.len())
    }
}

/// Deterministic random source for tests. Never use it to mint real sessions.
#[cfg(any(test, feature = "test-util"))]
pub struct SeededRandom {
    rng: std::sync::Mutex<rand::rngs::StdRng>,
}

#[cfg(any(test, feature = "test-util"))]
impl SeededRandom {
    /// Creates a source whose output is fully determined by `seed`.
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;

        Self {
            rng: std::sync::Mutex::new(rand::rngs::StdRng::seed_from_u64(seed)),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl RandomSource for SeededRandom {
    fn read(&self, buf: &mut [u8]) -> Result<usize, RandomError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| RandomError("seeded generator lock poisoned".to_string()))?;
        rng.fill_bytes(buf);
        Ok(buf.len())
    }
}
