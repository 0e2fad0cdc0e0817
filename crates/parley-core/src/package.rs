//! Encrypted message package and its canonical MAC input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::hex_bytes;

/// Domain tag prefixed to the MAC input
const MAC_DOMAIN: &[u8] = b"parley-message-v1";

/// Longest variable-length field a u32 length prefix can describe
pub const MAX_FIELD_LEN: usize = u32::MAX as usize;

/// A package field too long for its u32 length prefix.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{field} is {len} bytes, at most {MAX_FIELD_LEN} fit a length prefix")]
pub struct FieldTooLong {
    /// Name of the oversized field
    pub field: &'static str,
    /// Its length in bytes
    pub len: usize,
}

/// One encrypted message on its way from `sender` to `recipient`.
///
/// Built once per outgoing message and consumed once by the recipient's
/// decrypt. `mac` covers every other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePackage {
    /// Session the package belongs to
    pub session_id: String,
    /// Sender's session counter after this message (first message is 1)
    pub counter: u64,
    /// AES-GCM IV
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    /// Ciphertext with GCM tag
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// HMAC-SHA256 over [`MessagePackage::authenticated_bytes`]
    #[serde(with = "hex_bytes")]
    pub mac: Vec<u8>,
    /// Sending user
    pub sender: String,
    /// Receiving user
    pub recipient: String,
    /// Sender wall clock, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl MessagePackage {
    /// Canonical bytes the MAC is computed over.
    ///
    /// Domain tag, then `session_id`, `counter`, `iv`, `ciphertext`, `sender`,
    /// `recipient`, `timestamp` in that order. Variable-length fields carry a
    /// u32 big-endian length prefix; integers are u64 big-endian.
    ///
    /// # Errors
    ///
    /// A variable-length field is longer than [`MAX_FIELD_LEN`].
    pub fn authenticated_bytes(&self) -> Result<Vec<u8>, FieldTooLong> {
        let mut out = Vec::with_capacity(
            MAC_DOMAIN.len()
                + 4 * 5
                + 8 * 2
                + self.session_id.len()
                + self.iv.len()
                + self.ciphertext.len()
                + self.sender.len()
                + self.recipient.len(),
        );
        out.extend_from_slice(MAC_DOMAIN);
        put_field(&mut out, "session_id", self.session_id.as_bytes())?;
        out.extend_from_slice(&self.counter.to_be_bytes());
        put_field(&mut out, "iv", &self.iv)?;
        put_field(&mut out, "ciphertext", &self.ciphertext)?;
        put_field(&mut out, "sender", self.sender.as_bytes())?;
        put_field(&mut out, "recipient", self.recipient.as_bytes())?;
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        Ok(out)
    }
}

/// Associated data bound into the AEAD: `session_id || counter`.
pub(crate) fn associated_data(session_id: &str, counter: u64) -> Result<Vec<u8>, FieldTooLong> {
    let mut aad = Vec::with_capacity(4 + session_id.len() + 8);
    put_field(&mut aad, "session_id", session_id.as_bytes())?;
    aad.extend_from_slice(&counter.to_be_bytes());
    Ok(aad)
}

/// Fails if `len` bytes do not fit a u32 length prefix.
pub(crate) fn check_field_len(field: &'static str, len: usize) -> Result<u32, FieldTooLong> {
    u32::try_from(len).map_err(|_| FieldTooLong { field, len })
}

fn put_field(out: &mut Vec<u8>, name: &'static str, field: &[u8]) -> Result<(), FieldTooLong> {
    let len = check_field_len(name, field.len())?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
    Ok(())
}
