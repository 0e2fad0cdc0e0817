//! Prekey signature verification
//!
//! Ed25519 with strict verification. The verifier is fail-closed: any
//! malformed input is reported as an invalid signature rather than an error.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::keys::PUBLIC_KEY_SIZE;

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Verify `signature` over `data` under the Ed25519 `public_key`.
///
/// Returns `false` for wrong-length inputs, keys that are not valid points,
/// non-canonical signatures and signatures that do not verify.
pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key.verify_strict(data, &signature).is_ok()
}
