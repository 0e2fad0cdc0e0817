//! Registration bundle published to the relay.

use serde::{Deserialize, Serialize};

use crate::wire::{hex_bytes, hex_list};

/// Public key material a user publishes so peers can open sessions with them.
///
/// `signature` is the identity key's Ed25519 signature over `pre_key`.
/// Bundles are immutable once created; the relay may hand out copies with
/// consumed one-time prekeys removed, which does not affect the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBundle {
    /// Owner of the bundle
    pub user_id: String,
    /// Ed25519 identity public key
    #[serde(with = "hex_bytes")]
    pub identity_key: Vec<u8>,
    /// X25519 signed prekey
    #[serde(with = "hex_bytes")]
    pub pre_key: Vec<u8>,
    /// X25519 one-time prekeys, in pool order
    #[serde(with = "hex_list")]
    pub one_time_pre_keys: Vec<Vec<u8>>,
    /// Signature over `pre_key`
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl IdentityBundle {
    /// First one-time prekey still listed, if any.
    pub fn first_one_time_pre_key(&self) -> Option<&[u8]> {
        self.one_time_pre_keys.first().map(Vec::as_slice)
    }
}
