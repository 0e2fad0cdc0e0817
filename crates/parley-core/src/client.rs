//! Client facade: one local user talking to a relay.
//!
//! Owns the keyring, borrows an injected [`SessionStore`] and wires the
//! establisher and codec to the [`Relay`]. Relay failures never leave core
//! state half-updated: outgoing packages are enqueued before the ratchet
//! advance is committed.

use std::{collections::BTreeSet, path::Path};

use tracing::{debug, info, warn};

use crate::{
    bundle::IdentityBundle,
    codec::MessageCodec,
    env::Environment,
    error::{ClientError, SessionError},
    establish::SessionEstablisher,
    keyring::{IdentityKeyring, KeyPairFactory, KeyringConfig},
    package::MessagePackage,
    relay::Relay,
    snapshot::SessionSnapshot,
    store::SessionStore,
};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Keyring settings
    pub keyring: KeyringConfig,
    /// Replenish and republish once fewer one-time prekeys than this remain
    pub replenish_below: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { keyring: KeyringConfig::default(), replenish_below: 2 }
    }
}

/// A decrypted incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Sending user
    pub sender: String,
    /// Session the message arrived on
    pub session_id: String,
    /// Sender's counter for this message
    pub counter: u64,
    /// Sender wall clock, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Decrypted payload
    pub plaintext: Vec<u8>,
}

/// A drained package that could not be opened.
#[derive(Debug)]
pub struct RejectedPackage {
    /// The package as received
    pub package: MessagePackage,
    /// Why it was rejected
    pub error: ClientError,
}

impl RejectedPackage {
    /// Whether [`Client::open`] may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(&self.error, ClientError::Relay(err) if err.is_transient())
    }
}

/// Parley client for one local user.
pub struct Client<E: Environment, R: Relay> {
    user_id: String,
    env: E,
    relay: R,
    config: ClientConfig,
    keyring: IdentityKeyring,
    store: SessionStore,
    establisher: SessionEstablisher<E>,
    codec: MessageCodec<E>,
}

impl<E: Environment, R: Relay> Client<E, R> {
    /// Create an uninitialized client for `user_id`.
    pub fn new(
        user_id: impl Into<String>,
        env: E,
        relay: R,
        store: SessionStore,
        config: ClientConfig,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            establisher: SessionEstablisher::new(env.clone()),
            codec: MessageCodec::new(env.clone(), user_id.clone()),
            user_id,
            env,
            relay,
            config,
            keyring: IdentityKeyring::new(),
            store,
        }
    }

    /// Local user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Generate key material and publish the registration bundle.
    ///
    /// If publishing fails the keys are kept; call [`publish`](Self::publish)
    /// to retry.
    pub fn initialize(&mut self) -> Result<IdentityBundle, ClientError> {
        let factory = KeyPairFactory::new(self.env.clone());
        self.keyring.initialize(&factory, self.config.keyring.one_time_pre_keys)?;
        let bundle = self.publish()?;
        info!(user_id = %self.user_id, one_time_pre_keys = bundle.one_time_pre_keys.len(), "registered");
        Ok(bundle)
    }

    /// Whether key material exists.
    pub fn is_initialized(&self) -> bool {
        self.keyring.is_initialized()
    }

    /// Publish the current bundle, replacing any earlier one.
    pub fn publish(&self) -> Result<IdentityBundle, ClientError> {
        let bundle = self.keyring.create_registration_bundle(&self.user_id)?;
        self.relay.publish(bundle.clone())?;
        debug!(user_id = %self.user_id, "bundle published");
        Ok(bundle)
    }

    /// Fetch `peer_id`'s bundle and establish a new session with them.
    pub fn connect(&self, peer_id: &str) -> Result<String, ClientError> {
        if !self.keyring.is_initialized() {
            return Err(SessionError::UninitializedClient.into());
        }
        let bundle = self.relay.fetch(peer_id)?;
        Ok(self.establisher.establish_session(&self.keyring, &self.store, peer_id, &bundle)?)
    }

    /// Current session id with `peer_id`, if any.
    pub fn session_with(&self, peer_id: &str) -> Option<String> {
        self.store.session_for_peer(peer_id)
    }

    /// Encrypt `plaintext` on the current session with `peer_id` and enqueue
    /// it with the relay.
    ///
    /// The session advances only if the relay accepts the package.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound`: call [`connect`](Self::connect) first
    /// - `Relay`: session is unchanged
    pub fn send(&self, peer_id: &str, plaintext: &[u8]) -> Result<MessagePackage, ClientError> {
        let session_id = self
            .store
            .session_for_peer(peer_id)
            .ok_or_else(|| SessionError::SessionNotFound { session_id: format!("<none>:{peer_id}") })?;

        self.store.transact(&session_id, |session| {
            let package = self.codec.encrypt(session, plaintext)?;
            self.relay.enqueue(peer_id, package.clone())?;
            Ok(package)
        })
    }

    /// Drain the relay queue and open every package in arrival order.
    ///
    /// Each package gets its own result; one bad package does not stop the
    /// rest. Packages that failed on a transient relay error come back in
    /// the [`RejectedPackage`] for a later [`open`](Self::open). Afterwards
    /// the one-time prekey pool is topped up if it ran low.
    pub fn receive(&mut self) -> Result<Vec<Result<ReceivedMessage, RejectedPackage>>, ClientError> {
        let packages = self.relay.drain(&self.user_id)?;
        let results: Vec<_> = packages
            .into_iter()
            .map(|package| self.open(&package).map_err(|error| RejectedPackage { package, error }))
            .collect();

        if self.keyring.one_time_count() < self.config.replenish_below {
            let user_id = self.user_id.clone();
            self.replenish().unwrap_or_else(|err| {
                warn!(user_id = %user_id, error = %err, "one-time prekey replenish failed");
            });
        }
        Ok(results)
    }

    /// Open one package, accepting a new session if it starts one.
    pub fn open(&mut self, package: &MessagePackage) -> Result<ReceivedMessage, ClientError> {
        if !self.store.contains(&package.session_id) && package.counter == 1 {
            let bundle = self.relay.peek(&package.sender)?;
            let accepted = self.establisher.accept_session(
                &mut self.keyring,
                &self.store,
                &package.sender,
                &bundle,
                package,
            );
            match accepted {
                // Accepted through another handle to the store in the
                // meantime; the replay check below decides
                Ok(_) | Err(SessionError::SessionExists { .. }) => {},
                Err(err) => return Err(err.into()),
            }
        }

        let plaintext = self.codec.decrypt(&self.store, package)?;
        Ok(ReceivedMessage {
            sender: package.sender.clone(),
            session_id: package.session_id.clone(),
            counter: package.counter,
            timestamp: package.timestamp,
            plaintext,
        })
    }

    /// Refill the one-time prekey pool to its configured size and republish.
    pub fn replenish(&mut self) -> Result<(), ClientError> {
        let missing = self.config.keyring.one_time_pre_keys.saturating_sub(self.keyring.one_time_count());
        if missing == 0 {
            return Ok(());
        }
        let factory = KeyPairFactory::new(self.env.clone());
        self.keyring.replenish(&factory, missing)?;
        self.publish()?;
        Ok(())
    }

    /// Users with a published bundle.
    pub fn users(&self) -> Result<BTreeSet<String>, ClientError> {
        Ok(self.relay.list_users()?)
    }

    /// Local keyring.
    pub fn keyring(&self) -> &IdentityKeyring {
        &self.keyring
    }

    /// Injected session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Persist every session to `path`.
    pub fn save_sessions(&self, path: &Path) -> Result<(), ClientError> {
        self.store.snapshot().save(path)?;
        Ok(())
    }

    /// Load sessions saved by [`save_sessions`](Self::save_sessions).
    pub fn load_sessions(&self, path: &Path) -> Result<(), ClientError> {
        self.store.restore(&SessionSnapshot::load(path)?)?;
        Ok(())
    }
}

impl<E: Environment, R: Relay> std::fmt::Debug for Client<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user_id", &self.user_id)
            .field("initialized", &self.keyring.is_initialized())
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}
