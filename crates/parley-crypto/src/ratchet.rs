//! Symmetric ratchet over a session's key material
//!
//! # Security Properties
//!
//! - Forward Secrecy: the previous keys are overwritten on every step
//! - Role Separation: encryption, MAC and chain keys come from separately
//!   labeled expansions of the step output and never alias
//! - Determinism: both peers stepping the same state reach the same keys

use std::fmt;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::agreement::SharedSecret;

type HmacSha256 = Hmac<Sha256>;

/// Size of each session key in bytes
pub const KEY_SIZE: usize = 16;

/// Fixed input to the step PRF
const STEP_LABEL: &[u8] = b"parley-ratchet-step";

/// Label for the encryption key expansion
const ENCRYPTION_LABEL: &[u8] = b"encryption";

/// Label for the MAC key expansion
const MAC_LABEL: &[u8] = b"mac";

/// Label for the chain key expansion
const CHAIN_LABEL: &[u8] = b"chain";

/// Current symmetric key material of a session.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Computes `HMAC(chain_key, STEP_LABEL)`
/// 2. Expands that output into fresh encryption, MAC and chain keys
/// 3. Zeroizes and replaces the old keys
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    encryption: [u8; KEY_SIZE],
    mac: [u8; KEY_SIZE],
    chain: [u8; KEY_SIZE],
}

impl SessionKeys {
    /// Initial keys for a freshly agreed session.
    pub fn from_shared_secret(secret: &SharedSecret) -> Self {
        expand_roles(secret.as_bytes())
    }

    /// Rebuild keys from persisted parts.
    pub fn from_parts(
        encryption: [u8; KEY_SIZE],
        mac: [u8; KEY_SIZE],
        chain: [u8; KEY_SIZE],
    ) -> Self {
        Self { encryption, mac, chain }
    }

    /// Key for the AEAD cipher.
    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption
    }

    /// Key for the package MAC.
    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac
    }

    /// Key the next ratchet step is computed from.
    pub fn chain_key(&self) -> &[u8; KEY_SIZE] {
        &self.chain
    }

    /// Step the ratchet once, replacing all three keys.
    pub fn advance(&mut self) {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(STEP_LABEL);
        let mut output: [u8; 32] = mac.finalize().into_bytes().into();

        let next = expand_roles(&output);
        output.zeroize();

        self.zeroize_all();
        *self = next;
    }

    fn zeroize_all(&mut self) {
        self.encryption.zeroize();
        self.mac.zeroize();
        self.chain.zeroize();
    }
}

/// Expand a 32-byte pseudorandom key into the three role keys.
fn expand_roles(prk: &[u8; 32]) -> SessionKeys {
    let Ok(hkdf) = Hkdf::<Sha256>::from_prk(prk) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 PRK length");
    };

    let mut keys = SessionKeys { encryption: [0; KEY_SIZE], mac: [0; KEY_SIZE], chain: [0; KEY_SIZE] };
    for (label, out) in [
        (ENCRYPTION_LABEL, &mut keys.encryption),
        (MAC_LABEL, &mut keys.mac),
        (CHAIN_LABEL, &mut keys.chain),
    ] {
        let Ok(()) = hkdf.expand(label, out) else {
            unreachable!("16 bytes is a valid HKDF-SHA256 output length");
        };
    }
    keys
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.zeroize_all();
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> SessionKeys {
        let mut prk = [0u8; 32];
        for (i, byte) in prk.iter_mut().enumerate() {
            *byte = i as u8;
        }
        expand_roles(&prk)
    }

    #[test]
    fn roles_never_alias() {
        let mut keys = test_keys();
        for _ in 0..16 {
            assert_ne!(keys.encryption_key(), keys.mac_key());
            assert_ne!(keys.encryption_key(), keys.chain_key());
            assert_ne!(keys.mac_key(), keys.chain_key());
            keys.advance();
        }
    }

    #[test]
    fn advance_replaces_every_key() {
        let mut keys = test_keys();
        let before = keys.clone();
        keys.advance();

        assert_ne!(keys.encryption_key(), before.encryption_key());
        assert_ne!(keys.mac_key(), before.mac_key());
        assert_ne!(keys.chain_key(), before.chain_key());
    }

    #[test]
    fn ratchet_is_deterministic() {
        let mut a = test_keys();
        let mut b = test_keys();

        for _ in 0..10 {
            a.advance();
            b.advance();
            assert_eq!(a, b, "same state must produce same keys");
        }
    }

    #[test]
    fn advance_depends_only_on_chain_key() {
        let mut a = test_keys();
        let mut b = SessionKeys::from_parts([0xAA; KEY_SIZE], [0xBB; KEY_SIZE], *a.chain_key());

        a.advance();
        b.advance();
        assert_eq!(a, b);
    }

    #[test]
    fn sequence_has_no_repeats() {
        let mut keys = test_keys();
        let mut seen = Vec::new();
        for _ in 0..64 {
            seen.push(*keys.encryption_key());
            keys.advance();
        }
        for i in 0..seen.len() {
            for j in (i + 1)..seen.len() {
                assert_ne!(seen[i], seen[j], "generations {i} and {j} collide");
            }
        }
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", test_keys()), "SessionKeys(..)");
    }
}
