//! Asymmetric key pairs for identity, prekey and one-time prekey roles
//!
//! Identity pairs are Ed25519 so they can sign the prekey. Their X25519 form
//! for key agreement comes from the Edwards → Montgomery map, which keeps the
//! published identity key a single 32-byte value. Prekeys and one-time
//! prekeys are plain X25519.
//!
//! Constructors take a caller-provided seed; drawing entropy is the caller's
//! job.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{error::CryptoError, signature::SIGNATURE_SIZE};

/// Size of a key seed in bytes
pub const SEED_SIZE: usize = 32;

/// Size of every public key in bytes (Ed25519 and X25519)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Role a key pair plays in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    /// Long-term identity key
    Identity,
    /// Medium-term signed prekey
    PreKey,
    /// Single-use prekey
    OneTimePreKey,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::PreKey => f.write_str("prekey"),
            Self::OneTimePreKey => f.write_str("one-time prekey"),
        }
    }
}

/// Long-term identity key pair.
///
/// Signs the prekey and participates in key agreement through its X25519
/// form. The signing key zeroizes itself on drop.
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Build an identity pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        Self { signing_key: SigningKey::from_bytes(seed) }
    }

    /// Ed25519 verifying key bytes, as published in the bundle.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign `data` with the identity key.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(data).to_bytes()
    }

    /// X25519 secret matching [`identity_agreement_key`] of our public bytes.
    pub(crate) fn agreement_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signing_key.to_scalar_bytes())
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &PublicBytes(&self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// X25519 key pair used as a signed prekey or a one-time prekey.
pub struct PreKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl PreKeyPair {
    /// Build a prekey pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        let secret = StaticSecret::from(*seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// X25519 public key bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for PreKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreKeyPair")
            .field("public", &PublicBytes(&self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// Decode a published identity key into its X25519 agreement form.
///
/// Rejects bytes that are not a valid Edwards point and weak (small-order)
/// points.
pub fn identity_agreement_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let invalid = CryptoError::InvalidPublicKey { role: KeyRole::Identity };
    let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| invalid.clone())?;
    let verifying_key = VerifyingKey::from_bytes(&array).map_err(|_| invalid.clone())?;
    if verifying_key.is_weak() {
        return Err(invalid);
    }
    Ok(PublicKey::from(verifying_key.to_montgomery().to_bytes()))
}

/// Decode a published X25519 prekey or one-time prekey.
pub fn agreement_key(bytes: &[u8], role: KeyRole) -> Result<PublicKey, CryptoError> {
    let array: [u8; PUBLIC_KEY_SIZE] =
        bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey { role })?;
    Ok(PublicKey::from(array))
}

struct PublicBytes<'a>(&'a [u8; PUBLIC_KEY_SIZE]);

impl fmt::Debug for PublicBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        f.write_str("…")
    }
}
