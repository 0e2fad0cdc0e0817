//! Pairwise session state.

use parley_crypto::SessionKeys;

/// Symmetric state shared with one peer.
///
/// Mutated only through the message codec: every accepted encrypt or decrypt
/// sets the counter and steps the ratchet exactly once.
///
/// # Invariants
///
/// - `counter` only increases
/// - Keys change on every accepted message and are never reused
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    peer_id: String,
    keys: SessionKeys,
    counter: u64,
}

impl Session {
    /// New session at counter 0.
    pub(crate) fn new(id: String, peer_id: String, keys: SessionKeys) -> Self {
        Self { id, peer_id, keys, counter: 0 }
    }

    /// Rebuild a session from persisted state.
    pub fn restore(id: String, peer_id: String, keys: SessionKeys, counter: u64) -> Self {
        Self { id, peer_id, keys, counter }
    }

    /// Session identifier (`<128-bit hex>:<peer id>` from the initiator).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Peer this session talks to.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Counter of the last message sent or accepted.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Current key material.
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Record an accepted message and step the ratchet.
    pub(crate) fn commit(&mut self, counter: u64) {
        debug_assert!(counter > self.counter);
        self.counter = counter;
        self.keys.advance();
    }
}

/// Allocate a fresh session identifier for `peer_id`.
pub(crate) fn session_id(random: u128, peer_id: &str) -> String {
    format!("{random:032x}:{peer_id}")
}
