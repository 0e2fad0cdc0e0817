//! Bundle signature verification.

use parley_crypto::signature;

use crate::bundle::IdentityBundle;

/// Checks that a prekey is bound to an identity key.
///
/// Fail-closed: malformed keys or signatures verify as `false`, never as an
/// error. Uses the same Ed25519 scheme the keyring signs with.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleVerifier;

impl BundleVerifier {
    /// Verify `signature` over `data` under `public_key`.
    pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        signature::verify(data, signature, public_key)
    }

    /// Verify a bundle's prekey signature under its own identity key.
    pub fn verify_bundle(bundle: &IdentityBundle) -> bool {
        Self::verify(&bundle.pre_key, &bundle.signature, &bundle.identity_key)
    }
}

#[cfg(test)]
mod tests {
    use parley_crypto::{IdentityKeyPair, PreKeyPair};

    use super::*;

    fn bundle() -> IdentityBundle {
        let identity = IdentityKeyPair::from_seed(&[1; 32]);
        let pre_key = PreKeyPair::from_seed(&[2; 32]).public_bytes();
        IdentityBundle {
            user_id: "alice".into(),
            identity_key: identity.public_bytes().to_vec(),
            pre_key: pre_key.to_vec(),
            one_time_pre_keys: vec![],
            signature: identity.sign(&pre_key).to_vec(),
        }
    }

    #[test]
    fn genuine_bundle_verifies() {
        assert!(BundleVerifier::verify_bundle(&bundle()));
    }

    #[test]
    fn modified_pre_key_fails() {
        let mut bundle = bundle();
        bundle.pre_key[0] ^= 0x01;
        assert!(!BundleVerifier::verify_bundle(&bundle));
    }

    #[test]
    fn substituted_identity_fails() {
        let mut bundle = bundle();
        bundle.identity_key = IdentityKeyPair::from_seed(&[9; 32]).public_bytes().to_vec();
        assert!(!BundleVerifier::verify_bundle(&bundle));
    }

    #[test]
    fn garbage_fails_closed() {
        assert!(!BundleVerifier::verify(b"", b"", b""));
        assert!(!BundleVerifier::verify(b"data", &[0u8; 64], &[0xFF; 32]));
    }

    #[test]
    fn one_time_keys_are_not_signed() {
        // The relay trims consumed one-time keys; the signature must survive that
        let mut bundle = bundle();
        bundle.one_time_pre_keys.push(vec![7; 32]);
        assert!(BundleVerifier::verify_bundle(&bundle));
    }
}
