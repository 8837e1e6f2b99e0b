use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, SessionError};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Derives an AES-256 key from operator supplied key material.
    ///
    /// The material may have any non-zero length; it is hashed with SHA-256
    /// down to exactly [`KEY_SIZE`] bytes.
    ///
    /// # Arguments
    ///
    /// * `material` - The configured encryption key.
    ///
    /// # Returns
    ///
    /// A `Result` containing the derived key.
    pub fn derive(material: &[u8]) -> Result<Self> {
        if material.is_empty() {
            return Err(SessionError::Config(
                "encryption key material must not be empty".to_string(),
            ));
        }

        Ok(Self(Sha256::digest(material).into()))
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Builds the AES-256-GCM cipher for a key.
pub fn cipher(key: &SecureKey) -> Aes256Gcm {
    Aes256Gcm::new(key.as_bytes().into())
}

/// Encrypts a plaintext using AES-256-GCM.
///
/// # Arguments
///
/// * `cipher` - The AES-256-GCM cipher.
/// * `nonce` - A nonce that has never been used with this key.
/// * `plaintext` - The data to encrypt.
///
/// # Returns
///
/// The sealed blob laid out as `nonce || ciphertext || tag`.
pub fn seal(cipher: &Aes256Gcm, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| SessionError::Crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// Decrypts a blob produced by [`seal`].
///
/// Fails when the blob is shorter than a nonce or when the tag does not
/// verify under this cipher's key.
pub fn open(cipher: &Aes256Gcm, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(SessionError::Crypto(format!(
            "Decryption failed: ciphertext is {} bytes, shorter than the nonce",
            sealed.len()
        )));
    }

    let (nonce, body) = sealed.split_at(NONCE_SIZE);

    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|e| SessionError::Crypto(format!("Decryption failed: {}", e)))
}
