//! Relay rules over a pluggable store.

use std::collections::BTreeSet;

use parley_core::{IdentityBundle, MessagePackage, Relay, RelayError};
use tracing::{debug, warn};

use crate::store::RelayStore;

/// Default per-recipient queue bound.
pub const DEFAULT_MAX_QUEUE_LEN: usize = 1000;

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum packages waiting for one recipient
    pub max_queue_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { max_queue_len: DEFAULT_MAX_QUEUE_LEN }
    }
}

/// [`Relay`] implementation backed by a [`RelayStore`].
///
/// # Invariants
///
/// - Each one-time prekey leads at most one fetched bundle, including across
///   republishes, so no two initiators agree on the same one
/// - A recipient queue never exceeds `max_queue_len`
/// - `drain` returns packages in enqueue order
#[derive(Debug, Clone)]
pub struct Mailbox<S: RelayStore> {
    store: S,
    config: RelayConfig,
}

impl<S: RelayStore> Mailbox<S> {
    /// Create a mailbox over `store`.
    pub fn new(store: S, config: RelayConfig) -> Self {
        Self { store, config }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Configuration in effect.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Packages waiting for `user_id`.
    pub fn pending(&self, user_id: &str) -> Result<usize, RelayError> {
        Ok(self.store.queue_len(user_id)?)
    }

    /// Stored bundle with consumed one-time prekeys removed.
    fn available(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        let mut bundle = self
            .store
            .load_bundle(user_id)?
            .ok_or_else(|| RelayError::NotFound { user_id: user_id.to_string() })?;
        let consumed = self.store.consumed_keys(user_id)?;
        bundle.one_time_pre_keys.retain(|key| !consumed.contains(key));
        Ok(bundle)
    }
}

impl<S: RelayStore> Relay for Mailbox<S> {
    fn publish(&self, bundle: IdentityBundle) -> Result<(), RelayError> {
        self.store.store_bundle(&bundle)?;
        debug!(
            user_id = %bundle.user_id,
            one_time_pre_keys = bundle.one_time_pre_keys.len(),
            "bundle published"
        );
        Ok(())
    }

    fn fetch(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        loop {
            let bundle = self.available(user_id)?;
            let Some(first) = bundle.first_one_time_pre_key() else {
                debug!(user_id, "bundle fetched without one-time prekey");
                return Ok(bundle);
            };

            if self.store.reserve_one_time_key(user_id, first)? {
                debug!(user_id, remaining = bundle.one_time_pre_keys.len() - 1, "bundle fetched");
                return Ok(bundle);
            }
            // Lost a race for this key: reload and take the next one
        }
    }

    fn peek(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        self.available(user_id)
    }

    fn enqueue(&self, recipient: &str, package: MessagePackage) -> Result<(), RelayError> {
        if self.store.load_bundle(recipient)?.is_none() {
            return Err(RelayError::NotFound { user_id: recipient.to_string() });
        }

        let capacity = self.config.max_queue_len;
        if !self.store.append_package(recipient, &package, capacity)? {
            warn!(recipient, capacity, sender = %package.sender, "recipient queue full");
            return Err(RelayError::QueueFull { recipient: recipient.to_string(), capacity });
        }
        debug!(recipient, sender = %package.sender, counter = package.counter, "package queued");
        Ok(())
    }

    fn drain(&self, user_id: &str) -> Result<Vec<MessagePackage>, RelayError> {
        let packages = self.store.take_packages(user_id)?;
        if !packages.is_empty() {
            debug!(user_id, count = packages.len(), "queue drained");
        }
        Ok(packages)
    }

    fn list_users(&self) -> Result<BTreeSet<String>, RelayError> {
        Ok(self.store.list_users()?)
    }
}
