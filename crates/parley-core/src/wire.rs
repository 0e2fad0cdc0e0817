//! Wire encoding for bundles and packages.
//!
//! Field names follow the published shape (`userId`, `identityKey`,
//! `sessionId`, ...). Opaque byte fields are carried as lowercase hex so the
//! same serde derive works for text and binary transports; [`encode`] and
//! [`decode`] use CBOR for byte transports.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Errors from wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Value could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes are not a valid encoding of the requested type
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encode a bundle, package or snapshot as CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decode CBOR produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// Serde adapter: `Vec<u8>` as a hex string.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Vec<Vec<u8>>` as a list of hex strings.
pub(crate) mod hex_list {
    use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};

    pub(crate) fn serialize<S: Serializer>(
        items: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        items.into_iter().map(|s| hex::decode(s).map_err(serde::de::Error::custom)).collect()
    }
}
