//! HMAC-SHA256 over canonical package bytes

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of a package MAC in bytes
pub const MAC_SIZE: usize = 32;

/// Compute the MAC of `data` under `key`.
pub fn compute(key: &[u8], data: &[u8]) -> [u8; MAC_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Check `tag` against the MAC of `data` under `key` in constant time.
pub fn verify(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
