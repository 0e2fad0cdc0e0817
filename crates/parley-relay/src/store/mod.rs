//! Storage abstraction for the relay
//!
//! Trait-based abstraction for persisting bundles, consumed one-time prekeys
//! and recipient queues. The trait is synchronous, like the rest of the
//! protocol code.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::collections::BTreeSet;

pub use chaotic::ChaoticRelayStore;
pub use error::StoreError;
pub use memory::MemoryRelayStore;
use parley_core::{IdentityBundle, MessagePackage};

pub use self::redb::RedbRelayStore;

/// Storage for relay state
///
/// Must be Clone (shared by every mailbox handle), Send + Sync and
/// synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying storage.
///
/// Operations that check and then mutate (`reserve_one_time_key`,
/// `append_package`) must do so atomically.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned.
pub trait RelayStore: Clone + Send + Sync + 'static {
    /// Store a bundle, replacing any earlier bundle of the same user.
    ///
    /// Consumed markers for one-time prekeys the new bundle still lists are
    /// kept; markers for keys it no longer lists are dropped in the same
    /// atomic step.
    fn store_bundle(&self, bundle: &IdentityBundle) -> Result<(), StoreError>;

    /// Load a user's bundle exactly as published. `None` if unknown.
    fn load_bundle(&self, user_id: &str) -> Result<Option<IdentityBundle>, StoreError>;

    /// Users with a stored bundle.
    fn list_users(&self) -> Result<BTreeSet<String>, StoreError>;

    /// One-time prekeys of `user_id` already handed out.
    fn consumed_keys(&self, user_id: &str) -> Result<BTreeSet<Vec<u8>>, StoreError>;

    /// Mark a one-time prekey as handed out.
    ///
    /// Returns `false` if it was already consumed.
    fn reserve_one_time_key(&self, user_id: &str, key: &[u8]) -> Result<bool, StoreError>;

    /// Append to the recipient's queue unless it already holds `capacity`
    /// packages.
    ///
    /// Returns `false` (and stores nothing) when the queue is full.
    fn append_package(
        &self,
        recipient: &str,
        package: &MessagePackage,
        capacity: usize,
    ) -> Result<bool, StoreError>;

    /// Remove and return every queued package, oldest first.
    fn take_packages(&self, recipient: &str) -> Result<Vec<MessagePackage>, StoreError>;

    /// Number of queued packages for `recipient`.
    fn queue_len(&self, recipient: &str) -> Result<usize, StoreError>;
}
