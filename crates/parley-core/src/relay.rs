//! Relay collaborator interface.
//!
//! The relay stores bundles and queues packages; it never sees key material
//! or plaintext. Implementations live outside the core (see `parley-relay`).

use std::{collections::BTreeSet, sync::Arc};

use thiserror::Error;

use crate::{bundle::IdentityBundle, package::MessagePackage};

/// Errors reported by a relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// No bundle is published under this user
    #[error("user not found: {user_id}")]
    NotFound {
        /// User that was looked up
        user_id: String,
    },

    /// Relay could not be reached or its storage failed
    #[error("relay unavailable: {reason}")]
    Unavailable {
        /// Underlying failure
        reason: String,
    },

    /// Recipient queue is at capacity
    #[error("queue for {recipient} is full ({capacity} packages)")]
    QueueFull {
        /// Recipient whose queue is full
        recipient: String,
        /// Configured queue bound
        capacity: usize,
    },
}

impl RelayError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::QueueFull { .. })
    }
}

/// Bundle directory and store-and-forward queue.
///
/// # Invariants
///
/// - `publish` is last-write-wins per user id
/// - `fetch` hands each one-time prekey out at most once
/// - `drain` returns packages in enqueue order and empties the queue
pub trait Relay: Send + Sync {
    /// Publish or replace the bundle for `bundle.user_id`.
    fn publish(&self, bundle: IdentityBundle) -> Result<(), RelayError>;

    /// Bundle for `user_id` with only unconsumed one-time prekeys, reserving
    /// the first of them.
    fn fetch(&self, user_id: &str) -> Result<IdentityBundle, RelayError>;

    /// Like [`fetch`](Self::fetch) without reserving anything.
    fn peek(&self, user_id: &str) -> Result<IdentityBundle, RelayError>;

    /// Append a package to the recipient's queue.
    fn enqueue(&self, recipient: &str, package: MessagePackage) -> Result<(), RelayError>;

    /// Take every queued package for `user_id`.
    fn drain(&self, user_id: &str) -> Result<Vec<MessagePackage>, RelayError>;

    /// Users with a published bundle.
    fn list_users(&self) -> Result<BTreeSet<String>, RelayError>;
}

impl<R: Relay + ?Sized> Relay for Arc<R> {
    fn publish(&self, bundle: IdentityBundle) -> Result<(), RelayError> {
        (**self).publish(bundle)
    }

    fn fetch(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        (**self).fetch(user_id)
    }

    fn peek(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        (**self).peek(user_id)
    }

    fn enqueue(&self, recipient: &str, package: MessagePackage) -> Result<(), RelayError> {
        (**self).enqueue(recipient, package)
    }

    fn drain(&self, user_id: &str) -> Result<Vec<MessagePackage>, RelayError> {
        (**self).drain(user_id)
    }

    fn list_users(&self) -> Result<BTreeSet<String>, RelayError> {
        (**self).list_users()
    }
}
