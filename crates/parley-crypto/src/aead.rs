//! Message encryption using AES-128-GCM
//!
//! All functions are pure - the IV must be provided by the caller.

use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, ratchet::KEY_SIZE};

/// Size of the AES-GCM IV (96 bits)
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` and `iv`, binding `aad`.
///
/// Returns ciphertext with the 16-byte tag appended.
///
/// # Security
///
/// - Caller MUST NOT reuse an (key, iv) pair; session keys change after
///   every message and the IV is random
pub fn seal(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes128Gcm::new(key.into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
    else {
        unreachable!("AES-128-GCM encryption cannot fail below the 64 GiB message limit");
    };

    ciphertext
}

/// Decrypt `ciphertext` under `key` and `iv`, checking `aad`.
///
/// # Errors
///
/// - `DecryptionFailed`: IV has the wrong length or the tag does not verify
pub fn open(
    key: &[u8; KEY_SIZE],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("iv must be {IV_SIZE} bytes, got {}", iv.len()),
        });
    }

    let cipher = Aes128Gcm::new(key.into());
    cipher.decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad }).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}
