//! Message codec: package encryption and authenticated decryption.
//!
//! Decrypt checks run in a fixed order and stop at the first failure:
//!
//! ```text
//! counter <= last accepted ──▶ ReplayDetected
//! MAC does not verify      ──▶ MacMismatch
//! AES-GCM open fails       ──▶ DecryptionFailure
//! otherwise                ──▶ commit counter, advance ratchet
//! ```
//!
//! Nothing is committed unless every check passes.

use parley_crypto::{aead, mac};
use tracing::{trace, warn};

use crate::{
    env::Environment,
    error::SessionError,
    package::{FieldTooLong, MessagePackage, associated_data, check_field_len},
    session::Session,
    store::SessionStore,
};

/// Encrypts and decrypts packages for one local user.
#[derive(Debug, Clone)]
pub struct MessageCodec<E: Environment> {
    env: E,
    local_id: String,
}

impl<E: Environment> MessageCodec<E> {
    /// Codec for packages sent and received by `local_id`.
    pub fn new(env: E, local_id: impl Into<String>) -> Self {
        Self { env, local_id: local_id.into() }
    }

    /// Local user this codec stamps as sender.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Encrypt `plaintext` as the next message of `session`.
    ///
    /// On success the session's counter is incremented and its keys advanced
    /// once. On failure the session is unchanged.
    ///
    /// # Errors
    ///
    /// - `CounterExhausted`: counter is at `u64::MAX`
    /// - `MessageTooLarge`: the ciphertext, or an id, would not fit its
    ///   u32 length prefix
    /// - `EntropyUnavailable`: no IV could be drawn
    pub fn encrypt(
        &self,
        session: &mut Session,
        plaintext: &[u8],
    ) -> Result<MessagePackage, SessionError> {
        let counter = session
            .counter()
            .checked_add(1)
            .ok_or_else(|| SessionError::CounterExhausted { session_id: session.id().to_string() })?;
        let too_large =
            |source| SessionError::MessageTooLarge { session_id: session.id().to_string(), source };
        sealed_len(plaintext.len()).map_err(too_large)?;
        let aad = associated_data(session.id(), counter).map_err(too_large)?;

        let mut iv = [0u8; aead::IV_SIZE];
        self.env.random_bytes(&mut iv)?;

        let keys = session.keys();
        let ciphertext = aead::seal(keys.encryption_key(), &iv, &aad, plaintext);

        let mut package = MessagePackage {
            session_id: session.id().to_string(),
            counter,
            iv: iv.to_vec(),
            ciphertext,
            mac: Vec::new(),
            sender: self.local_id.clone(),
            recipient: session.peer_id().to_string(),
            timestamp: self.env.wall_clock_millis(),
        };
        let authenticated = package.authenticated_bytes().map_err(too_large)?;
        package.mac = mac::compute(keys.mac_key(), &authenticated).to_vec();

        session.commit(counter);
        trace!(session_id = session.id(), counter, "package encrypted");
        Ok(package)
    }

    /// Decrypt `package` against the matching session in `store`.
    ///
    /// The session is looked up by `package.session_id`, falling back to the
    /// current session for `package.sender`. Its lock is held from the
    /// replay check through the commit.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`: neither lookup finds a session
    /// - `ReplayDetected`, `MacMismatch`, `DecryptionFailure`: see module
    ///   docs; the session is left unchanged
    /// - `MessageTooLarge`: a field cannot be length-prefixed, so the MAC
    ///   input cannot be built
    pub fn decrypt(
        &self,
        store: &SessionStore,
        package: &MessagePackage,
    ) -> Result<Vec<u8>, SessionError> {
        store.transact_or_peer(&package.session_id, &package.sender, |session| {
            self.decrypt_session(session, package)
        })
    }

    /// Decrypt `package` with an already resolved session.
    ///
    /// Commits into `session` only on success. Prefer
    /// [`decrypt`](Self::decrypt), which also serializes concurrent callers.
    pub fn decrypt_session(
        &self,
        session: &mut Session,
        package: &MessagePackage,
    ) -> Result<Vec<u8>, SessionError> {
        if package.counter <= session.counter() {
            warn!(
                session_id = %package.session_id,
                counter = package.counter,
                last_accepted = session.counter(),
                "replayed package rejected"
            );
            return Err(SessionError::ReplayDetected {
                session_id: package.session_id.clone(),
                counter: package.counter,
                last_accepted: session.counter(),
            });
        }

        let too_large = |source| SessionError::MessageTooLarge {
            session_id: package.session_id.clone(),
            source,
        };
        let keys = session.keys();
        let authenticated = package.authenticated_bytes().map_err(too_large)?;
        if !mac::verify(keys.mac_key(), &authenticated, &package.mac) {
            warn!(
                session_id = %package.session_id,
                counter = package.counter,
                sender = %package.sender,
                "package mac mismatch"
            );
            return Err(SessionError::MacMismatch { session_id: package.session_id.clone() });
        }

        let plaintext = aead::open(
            keys.encryption_key(),
            &package.iv,
            &associated_data(&package.session_id, package.counter).map_err(too_large)?,
            &package.ciphertext,
        )
        .map_err(|e| SessionError::DecryptionFailure {
            session_id: package.session_id.clone(),
            reason: e.to_string(),
        })?;

        session.commit(package.counter);
        trace!(session_id = session.id(), counter = package.counter, "package decrypted");
        Ok(plaintext)
    }
}

/// Ciphertext length for `plaintext_len` bytes, if it fits a length prefix.
fn sealed_len(plaintext_len: usize) -> Result<usize, FieldTooLong> {
    let len = plaintext_len.saturating_add(aead::TAG_SIZE);
    check_field_len("ciphertext", len)?;
    Ok(len)
}
