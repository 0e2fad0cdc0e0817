//! Error types for the Parley session protocol.
//!
//! [`SessionError`] covers the core: key generation, bundle verification,
//! establishment and the message codec. [`ClientError`] adds relay failures
//! for the client facade. Security-relevant outcomes keep their own variants
//! so callers can tell a replay from a forgery from a plain bug.

use parley_crypto::CryptoError;
use thiserror::Error;

use crate::{env::EntropyError, package::FieldTooLong, relay::RelayError, snapshot::SnapshotError};

/// Errors from core session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation needs key material but the keyring was never initialized
    #[error("client keyring is not initialized")]
    UninitializedClient,

    /// Entropy for a key pair could not be obtained
    #[error("key generation failed: {reason}")]
    KeyGenerationFailure {
        /// Underlying failure
        reason: String,
    },

    /// Peer bundle's prekey signature does not verify under its identity key
    #[error("bundle signature for {user_id} does not verify")]
    InvalidBundleSignature {
        /// Owner claimed by the bundle
        user_id: String,
    },

    /// Peer public keys were malformed or produced a degenerate secret
    #[error("key agreement with {peer_id} failed: {source}")]
    KeyAgreementFailure {
        /// Peer the agreement was attempted with
        peer_id: String,
        /// Primitive failure
        source: CryptoError,
    },

    /// No session is stored under this identifier
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// Identifier that was looked up
        session_id: String,
    },

    /// Package counter is not ahead of the last accepted counter
    #[error("replay detected on {session_id}: counter {counter}, last accepted {last_accepted}")]
    ReplayDetected {
        /// Session the package claimed
        session_id: String,
        /// Counter carried by the package
        counter: u64,
        /// Counter of the last accepted package
        last_accepted: u64,
    },

    /// A first package named a session that is already established
    #[error("session already established: {session_id}")]
    SessionExists {
        /// Identifier that was already stored
        session_id: String,
    },

    /// A package field does not fit its length prefix
    #[error("message too large for {session_id}: {source}")]
    MessageTooLarge {
        /// Session the message belongs to
        session_id: String,
        /// Oversized field
        source: FieldTooLong,
    },

    /// Package MAC does not verify under the session's MAC key
    #[error("mac mismatch on {session_id}")]
    MacMismatch {
        /// Session the package claimed
        session_id: String,
    },

    /// Authenticated package failed to decrypt
    #[error("decryption failed on {session_id}: {reason}")]
    DecryptionFailure {
        /// Session the package claimed
        session_id: String,
        /// Cipher-level reason
        reason: String,
    },

    /// Session counter would overflow
    #[error("message counter exhausted on {session_id}")]
    CounterExhausted {
        /// Session that ran out of counter space
        session_id: String,
    },

    /// Entropy for an IV or session identifier could not be obtained
    #[error(transparent)]
    EntropyUnavailable(#[from] EntropyError),
}

impl SessionError {
    /// Returns true for outcomes that indicate tampering or an attack.
    ///
    /// Callers should drop the message and may alert; these must never be
    /// retried or downgraded to a generic failure.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::InvalidBundleSignature { .. }
                | Self::ReplayDetected { .. }
                | Self::MacMismatch { .. }
                | Self::SessionExists { .. }
        )
    }

    /// Returns true if the caller should establish a session and retry.
    pub fn requires_establishment(&self) -> bool {
        matches!(self, Self::SessionNotFound { .. })
    }
}

/// Errors from the client facade.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Core protocol failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Relay collaborator failure; core state is untouched
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Snapshot could not be saved or restored
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl ClientError {
    /// Core error, if this is one.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(err) => Some(err),
            _ => None,
        }
    }
}
