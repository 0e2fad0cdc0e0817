//! Parley Cryptographic Primitives
//!
//! Cryptographic building blocks for the Parley session protocol. Pure
//! functions with deterministic outputs. Callers provide seeds and nonces so
//! the protocol layer can be tested deterministically.
//!
//! # Key Lifecycle
//!
//! ```text
//! Identity (Ed25519) + PreKey (X25519) + OneTimePreKey (X25519)
//!        │
//!        ▼
//! Static 3-DH / 4-DH → HKDF(salt = session id) → Shared Secret
//!        │
//!        ▼
//! HKDF-Expand("encryption" | "mac" | "chain") → SessionKeys
//!        │
//!        ▼
//! Symmetric Ratchet (once per message) → next SessionKeys
//!        │
//!        ▼
//! AES-128-GCM + HMAC-SHA256 → MessagePackage
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - The prekey is signed with the identity key; peers verify before agreeing
//! - Every package field is covered by an HMAC under the current mac key
//! - AES-GCM tag failure is reported separately from MAC failure
//!
//! Forward Secrecy within a session:
//! - Ratchet output replaces all three keys; the old ones are zeroized
//! - Encryption, MAC and chain keys come from independently labeled
//!   expansions, so no two roles share bytes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod agreement;
mod error;
pub mod keys;
pub mod mac;
pub mod ratchet;
pub mod signature;

pub use agreement::{PeerPublicKeys, SHARED_SECRET_SIZE, SharedSecret};
pub use error::CryptoError;
pub use keys::{IdentityKeyPair, KeyRole, PUBLIC_KEY_SIZE, PreKeyPair, SEED_SIZE};
pub use ratchet::{KEY_SIZE, SessionKeys};
