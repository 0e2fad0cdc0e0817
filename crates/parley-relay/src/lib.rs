//! Parley relay
//!
//! Untrusted rendezvous for Parley clients: a directory of published
//! identity bundles and a store-and-forward queue per recipient. The relay
//! never sees key material or plaintext.
//!
//! # Architecture
//!
//! ```text
//! Client ──Relay trait──▶ Mailbox<S> ──RelayStore──▶ MemoryRelayStore
//!                            │                       RedbRelayStore
//!                            │                       ChaoticRelayStore<S>
//!                            ▼
//!              queue bounds, one-time prekey reservation
//! ```
//!
//! [`Mailbox`] holds the relay rules; a [`RelayStore`] only persists. Stores
//! are injected, so tests can swap in fault injection without touching the
//! rules.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod mailbox;
pub mod store;

pub use mailbox::{DEFAULT_MAX_QUEUE_LEN, Mailbox, RelayConfig};
pub use store::{ChaoticRelayStore, MemoryRelayStore, RedbRelayStore, RelayStore, StoreError};
