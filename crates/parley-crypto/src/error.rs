//! Error types for cryptographic primitives

use thiserror::Error;

use crate::keys::KeyRole;

/// Errors from cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Public key bytes do not decode to a usable key
    #[error("invalid {role} public key")]
    InvalidPublicKey {
        /// Role of the key that failed to decode
        role: KeyRole,
    },

    /// A Diffie-Hellman term produced the all-zero output (low-order point)
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    /// AEAD authentication failed or nonce was malformed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },
}
