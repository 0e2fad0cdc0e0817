//! Static-key Diffie-Hellman agreement for session establishment
//!
//! Both parties combine their own private keys with the peer's published
//! keys. Terms are always listed from the initiator's point of view so the
//! two sides concatenate identical bytes:
//!
//! ```text
//! DH1 = DH(IK_initiator,  SPK_responder)
//! DH2 = DH(SPK_initiator, IK_responder)
//! DH3 = DH(SPK_initiator, SPK_responder)
//! DH4 = DH(SPK_initiator, OPK_responder)   [only if a one-time key is used]
//!
//! secret = HKDF-SHA256(salt = session id, ikm = 0xFF*32 || DH1..DH4)
//! ```
//!
//! The session id salt makes the secret unique per session even when no
//! one-time prekey is available.

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::PublicKey;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keys::{IdentityKeyPair, KeyRole, PreKeyPair, agreement_key, identity_agreement_key},
};

/// Size of the agreed secret in bytes
pub const SHARED_SECRET_SIZE: usize = 32;

/// Info string for the agreement KDF
const AGREEMENT_INFO: &[u8] = b"parley-agreement-v1";

/// Leading pad that keeps the KDF input disjoint from a raw curve point
const AGREEMENT_PAD: [u8; 32] = [0xFF; 32];

/// Secret produced by key agreement. Zeroized on drop.
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Decoded public half of a peer's bundle.
#[derive(Debug, Clone)]
pub struct PeerPublicKeys {
    identity: PublicKey,
    pre_key: PublicKey,
    one_time_pre_key: Option<PublicKey>,
}

impl PeerPublicKeys {
    /// Decode the peer's published identity, prekey and optional one-time
    /// prekey bytes.
    pub fn decode(
        identity: &[u8],
        pre_key: &[u8],
        one_time_pre_key: Option<&[u8]>,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            identity: identity_agreement_key(identity)?,
            pre_key: agreement_key(pre_key, KeyRole::PreKey)?,
            one_time_pre_key: one_time_pre_key
                .map(|bytes| agreement_key(bytes, KeyRole::OneTimePreKey))
                .transpose()?,
        })
    }

    /// Whether a one-time prekey takes part in the agreement.
    pub fn has_one_time_pre_key(&self) -> bool {
        self.one_time_pre_key.is_some()
    }
}

/// Agreement from the initiator's side.
///
/// `peer` carries the responder's identity, signed prekey and the selected
/// one-time prekey (if any).
pub fn initiate(
    identity: &IdentityKeyPair,
    pre_key: &PreKeyPair,
    peer: &PeerPublicKeys,
    salt: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let identity_secret = identity.agreement_secret();

    let mut terms = Vec::with_capacity(4);
    terms.push(dh(identity_secret.diffie_hellman(&peer.pre_key))?);
    terms.push(dh(pre_key.secret().diffie_hellman(&peer.identity))?);
    terms.push(dh(pre_key.secret().diffie_hellman(&peer.pre_key))?);
    if let Some(one_time) = &peer.one_time_pre_key {
        terms.push(dh(pre_key.secret().diffie_hellman(one_time))?);
    }

    Ok(combine(&mut terms, salt))
}

/// Agreement from the responder's side.
///
/// `peer` carries the initiator's identity and signed prekey; its one-time
/// slot is ignored. `one_time_pre_key` is our own pair the initiator
/// selected, if any.
pub fn respond(
    identity: &IdentityKeyPair,
    pre_key: &PreKeyPair,
    one_time_pre_key: Option<&PreKeyPair>,
    peer: &PeerPublicKeys,
    salt: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let identity_secret = identity.agreement_secret();

    let mut terms = Vec::with_capacity(4);
    terms.push(dh(pre_key.secret().diffie_hellman(&peer.identity))?);
    terms.push(dh(identity_secret.diffie_hellman(&peer.pre_key))?);
    terms.push(dh(pre_key.secret().diffie_hellman(&peer.pre_key))?);
    if let Some(one_time) = one_time_pre_key {
        terms.push(dh(one_time.secret().diffie_hellman(&peer.pre_key))?);
    }

    Ok(combine(&mut terms, salt))
}

fn dh(shared: x25519_dalek::SharedSecret) -> Result<[u8; 32], CryptoError> {
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }
    Ok(shared.to_bytes())
}

fn combine(terms: &mut [[u8; 32]], salt: &[u8]) -> SharedSecret {
    let mut ikm = Vec::with_capacity(AGREEMENT_PAD.len() + terms.len() * 32);
    ikm.extend_from_slice(&AGREEMENT_PAD);
    for term in terms.iter() {
        ikm.extend_from_slice(term);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut secret = [0u8; SHARED_SECRET_SIZE];
    let Ok(()) = hkdf.expand(AGREEMENT_INFO, &mut secret) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    ikm.zeroize();
    for term in terms.iter_mut() {
        term.zeroize();
    }

    SharedSecret(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Party {
        identity: IdentityKeyPair,
        pre_key: PreKeyPair,
        one_time: PreKeyPair,
    }

    impl Party {
        fn new(fill: u8) -> Self {
            Self {
                identity: IdentityKeyPair::from_seed(&[fill; 32]),
                pre_key: PreKeyPair::from_seed(&[fill.wrapping_add(1); 32]),
                one_time: PreKeyPair::from_seed(&[fill.wrapping_add(2); 32]),
            }
        }

        fn published(&self, with_one_time: bool) -> PeerPublicKeys {
            let one_time = self.one_time.public_bytes();
            PeerPublicKeys::decode(
                &self.identity.public_bytes(),
                &self.pre_key.public_bytes(),
                with_one_time.then_some(one_time.as_slice()),
            )
            .unwrap()
        }
    }

    #[test]
    fn both_sides_agree_with_one_time_key() {
        let alice = Party::new(10);
        let bob = Party::new(20);

        let initiator =
            initiate(&bob.identity, &bob.pre_key, &alice.published(true), b"sid").unwrap();
        let responder = respond(
            &alice.identity,
            &alice.pre_key,
            Some(&alice.one_time),
            &bob.published(false),
            b"sid",
        )
        .unwrap();

        assert_eq!(initiator.as_bytes(), responder.as_bytes());
    }

    #[test]
    fn both_sides_agree_without_one_time_key() {
        let alice = Party::new(10);
        let bob = Party::new(20);

        let initiator =
            initiate(&bob.identity, &bob.pre_key, &alice.published(false), b"sid").unwrap();
        let responder =
            respond(&alice.identity, &alice.pre_key, None, &bob.published(false), b"sid").unwrap();

        assert_eq!(initiator.as_bytes(), responder.as_bytes());
    }

    #[test]
    fn one_time_key_changes_secret() {
        let alice = Party::new(10);
        let bob = Party::new(20);

        let with = initiate(&bob.identity, &bob.pre_key, &alice.published(true), b"sid").unwrap();
        let without =
            initiate(&bob.identity, &bob.pre_key, &alice.published(false), b"sid").unwrap();

        assert_ne!(with.as_bytes(), without.as_bytes());
    }

    #[test]
    fn salt_changes_secret() {
        let alice = Party::new(10);
        let bob = Party::new(20);
        let peer = alice.published(true);

        let a = initiate(&bob.identity, &bob.pre_key, &peer, b"session-a").unwrap();
        let b = initiate(&bob.identity, &bob.pre_key, &peer, b"session-b").unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn third_party_cannot_reproduce_secret() {
        let alice = Party::new(10);
        let bob = Party::new(20);
        let mallory = Party::new(30);

        let real = initiate(&bob.identity, &bob.pre_key, &alice.published(true), b"sid").unwrap();
        // Mallory knows every public key but holds the wrong private keys
        let forged = respond(
            &mallory.identity,
            &mallory.pre_key,
            Some(&mallory.one_time),
            &bob.published(false),
            b"sid",
        )
        .unwrap();

        assert_ne!(real.as_bytes(), forged.as_bytes());
    }

    #[test]
    fn low_order_prekey_is_rejected() {
        let bob = Party::new(20);
        let alice = Party::new(10);
        let peer = PeerPublicKeys::decode(&alice.identity.public_bytes(), &[0u8; 32], None).unwrap();

        let result = initiate(&bob.identity, &bob.pre_key, &peer, b"sid");
        assert!(matches!(result, Err(CryptoError::NonContributory)));
    }

    #[test]
    fn decode_rejects_malformed_one_time_key() {
        let alice = Party::new(10);
        let result = PeerPublicKeys::decode(
            &alice.identity.public_bytes(),
            &alice.pre_key.public_bytes(),
            Some(&[1, 2, 3]),
        );
        assert_eq!(result.unwrap_err(), CryptoError::InvalidPublicKey {
            role: KeyRole::OneTimePreKey
        });
    }
}
