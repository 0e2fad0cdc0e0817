//! Parley session protocol
//!
//! Pairwise encrypted sessions between users who publish signed key bundles
//! to a relay. All protocol logic is synchronous and in-memory; the relay and
//! the on-disk snapshot are collaborators reached through [`Relay`] and
//! [`SessionSnapshot`].
//!
//! # Components
//!
//! - [`IdentityKeyring`]: identity, prekey and one-time prekey pairs; signs
//!   the registration bundle
//! - [`BundleVerifier`]: fail-closed prekey signature check
//! - [`SessionEstablisher`]: turns a verified bundle into a [`Session`]
//! - [`MessageCodec`]: encrypt/decrypt with replay rejection and MAC
//!   verification, one ratchet step per accepted message
//! - [`SessionStore`]: session map with one lock per session
//! - [`Client`]: wires the above to a [`Relay`]
//!
//! # Flow
//!
//! ```text
//! IdentityKeyring ─bundle─▶ Relay ─fetch─▶ BundleVerifier
//!                                               │
//!                                               ▼
//!                                      SessionEstablisher
//!                                               │
//!                                               ▼
//!                    SessionStore ◀── Session ──┘
//!                         │
//!                         ▼
//!                   MessageCodec (encrypt / decrypt, ratchet)
//! ```
//!
//! Time and randomness come from an injected [`Environment`] so every
//! component can be driven deterministically in tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bundle;
mod client;
mod codec;
pub mod env;
mod error;
mod establish;
mod keyring;
mod package;
mod relay;
mod session;
mod snapshot;
mod store;
mod system_env;
mod verifier;
pub mod wire;

pub use bundle::IdentityBundle;
pub use client::{Client, ClientConfig, ReceivedMessage, RejectedPackage};
pub use codec::MessageCodec;
pub use env::{EntropyError, Environment};
pub use error::{ClientError, SessionError};
pub use establish::SessionEstablisher;
pub use keyring::{IdentityKeyring, KeyPairFactory, KeyringConfig};
pub use package::{FieldTooLong, MAX_FIELD_LEN, MessagePackage};
pub use relay::{Relay, RelayError};
pub use session::Session;
pub use snapshot::{SessionRecord, SessionSnapshot, SnapshotError};
pub use store::SessionStore;
pub use system_env::SystemEnv;
pub use verifier::BundleVerifier;
