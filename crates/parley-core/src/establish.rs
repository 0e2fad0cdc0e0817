//! Session establishment from a verified peer bundle.
//!
//! Initiator: verify the bundle, pick its first one-time prekey, agree on a
//! secret salted with a fresh session id, store the session.
//!
//! Responder: the first package names the session id but not which of our
//! one-time prekeys the initiator used. Each candidate is derived in pool
//! order (then the no-one-time-key case) and the one whose MAC key
//! authenticates the first package wins. Its private key is deleted.

use parley_crypto::{
    CryptoError, PUBLIC_KEY_SIZE, PeerPublicKeys, PreKeyPair, SessionKeys, agreement, mac,
};
use tracing::{debug, warn};

use crate::{
    bundle::IdentityBundle,
    env::Environment,
    error::SessionError,
    keyring::IdentityKeyring,
    package::MessagePackage,
    session::{self, Session},
    store::SessionStore,
    verifier::BundleVerifier,
};

/// Creates sessions from peer bundles.
#[derive(Debug, Clone)]
pub struct SessionEstablisher<E: Environment> {
    env: E,
}

impl<E: Environment> SessionEstablisher<E> {
    /// Create an establisher drawing session ids from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Open a session with `peer_id` as the initiator.
    ///
    /// Returns the new session id. The session is stored at counter 0 and
    /// becomes the current session for `peer_id`.
    ///
    /// # Errors
    ///
    /// - `UninitializedClient`: local keyring has no material
    /// - `InvalidBundleSignature`: no session is created
    /// - `KeyAgreementFailure`: peer keys are malformed or low-order
    pub fn establish_session(
        &self,
        keyring: &IdentityKeyring,
        store: &SessionStore,
        peer_id: &str,
        bundle: &IdentityBundle,
    ) -> Result<String, SessionError> {
        let identity = keyring.identity()?;
        let pre_key = keyring.pre_key()?;
        verify(peer_id, bundle)?;

        let session_id = session::session_id(self.env.random_u128()?, peer_id);
        let peer = PeerPublicKeys::decode(
            &bundle.identity_key,
            &bundle.pre_key,
            bundle.first_one_time_pre_key(),
        )
        .map_err(|source| agreement_failure(peer_id, source))?;

        let secret = agreement::initiate(identity, pre_key, &peer, session_id.as_bytes())
            .map_err(|source| agreement_failure(peer_id, source))?;
        let keys = SessionKeys::from_shared_secret(&secret);

        store.insert(Session::new(session_id.clone(), peer_id.to_string(), keys));
        debug!(
            peer_id,
            session_id = %session_id,
            one_time_pre_key = peer.has_one_time_pre_key(),
            "session established"
        );
        Ok(session_id)
    }

    /// Accept the session `first_package` opens, as the responder.
    ///
    /// `bundle` is the initiator's published bundle. On success the session
    /// is stored at counter 0 under `first_package.session_id`, ready for
    /// the package to be decrypted, and the matched one-time prekey is
    /// removed from `keyring`.
    ///
    /// # Errors
    ///
    /// - `UninitializedClient`, `InvalidBundleSignature`,
    ///   `KeyAgreementFailure`: as for
    ///   [`establish_session`](Self::establish_session)
    /// - `MacMismatch`: no candidate key authenticates the package
    /// - `SessionExists`: `first_package.session_id` is already stored; the
    ///   stored session and the keyring are left untouched
    pub fn accept_session(
        &self,
        keyring: &mut IdentityKeyring,
        store: &SessionStore,
        peer_id: &str,
        bundle: &IdentityBundle,
        first_package: &MessagePackage,
    ) -> Result<String, SessionError> {
        verify(peer_id, bundle)?;
        let peer = PeerPublicKeys::decode(&bundle.identity_key, &bundle.pre_key, None)
            .map_err(|source| agreement_failure(peer_id, source))?;

        let session_id = first_package.session_id.as_str();
        let (keys, one_time) = find_candidate(keyring, &peer, peer_id, first_package)?
            .ok_or_else(|| {
                warn!(peer_id, session_id, "no key candidate authenticates first package");
                SessionError::MacMismatch { session_id: session_id.to_string() }
            })?;

        // An accepted session is never rebuilt: that would reset its counter
        // and let the first package be accepted again
        store.insert_new(Session::new(session_id.to_string(), peer_id.to_string(), keys)).inspect_err(
            |_| warn!(peer_id, session_id, "first package for an established session rejected"),
        )?;
        if let Some(public) = one_time {
            keyring.take_one_time_pre_key(&public);
        }
        debug!(
            peer_id,
            session_id,
            one_time_pre_key = one_time.is_some(),
            remaining = keyring.one_time_count(),
            "session accepted"
        );
        Ok(session_id.to_string())
    }
}

type Candidate = (SessionKeys, Option<[u8; PUBLIC_KEY_SIZE]>);

fn find_candidate(
    keyring: &IdentityKeyring,
    peer: &PeerPublicKeys,
    peer_id: &str,
    package: &MessagePackage,
) -> Result<Option<Candidate>, SessionError> {
    let identity = keyring.identity()?;
    let pre_key = keyring.pre_key()?;
    let salt = package.session_id.as_bytes();
    let authenticated = package.authenticated_bytes().map_err(|source| {
        SessionError::MessageTooLarge { session_id: package.session_id.clone(), source }
    })?;

    let candidates = keyring.one_time_pre_keys().iter().map(Some).chain([None]);
    for one_time in candidates {
        let secret = agreement::respond(identity, pre_key, one_time, peer, salt)
            .map_err(|source| agreement_failure(peer_id, source))?;
        let keys = SessionKeys::from_shared_secret(&secret);

        if mac::verify(keys.mac_key(), &authenticated, &package.mac) {
            return Ok(Some((keys, one_time.map(PreKeyPair::public_bytes))));
        }
    }
    Ok(None)
}

fn verify(peer_id: &str, bundle: &IdentityBundle) -> Result<(), SessionError> {
    if BundleVerifier::verify_bundle(bundle) {
        return Ok(());
    }
    warn!(peer_id, bundle_user = %bundle.user_id, "rejecting bundle with invalid signature");
    Err(SessionError::InvalidBundleSignature { user_id: bundle.user_id.clone() })
}

fn agreement_failure(peer_id: &str, source: CryptoError) -> SessionError {
    SessionError::KeyAgreementFailure { peer_id: peer_id.to_string(), source }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    };

    use super::*;
    use crate::{codec::MessageCodec, env::EntropyError, keyring::KeyPairFactory};

    #[derive(Clone)]
    struct CountingEnv {
        next: Arc<AtomicU8>,
    }

    impl CountingEnv {
        fn starting_at(n: u8) -> Self {
            Self { next: Arc::new(AtomicU8::new(n)) }
        }
    }

    impl Environment for CountingEnv {
        fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
            buffer.fill(self.next.fetch_add(1, Ordering::Relaxed));
            Ok(())
        }

        fn wall_clock_millis(&self) -> u64 {
            1_000
        }
    }

    struct Peer {
        id: &'static str,
        env: CountingEnv,
        keyring: IdentityKeyring,
        store: SessionStore,
    }

    impl Peer {
        fn new(id: &'static str, seed: u8, one_time: usize) -> Self {
            let env = CountingEnv::starting_at(seed);
            let mut keyring = IdentityKeyring::new();
            keyring.initialize(&KeyPairFactory::new(env.clone()), one_time).unwrap();
            Self { id, env, keyring, store: SessionStore::new() }
        }

        fn bundle(&self) -> IdentityBundle {
            self.keyring.create_registration_bundle(self.id).unwrap()
        }

        fn establisher(&self) -> SessionEstablisher<CountingEnv> {
            SessionEstablisher::new(self.env.clone())
        }

        fn first_package(&self, session_id: &str) -> MessagePackage {
            let codec = MessageCodec::new(self.env.clone(), self.id);
            self.store.transact(session_id, |s| codec.encrypt(s, b"hi")).unwrap()
        }
    }

    fn establish(initiator: &Peer, responder: &Peer) -> String {
        initiator
            .establisher()
            .establish_session(&initiator.keyring, &initiator.store, responder.id, &responder.bundle())
            .unwrap()
    }

    #[test]
    fn establish_stores_session_at_zero() {
        let alice = Peer::new("alice", 10, 3);
        let bob = Peer::new("bob", 100, 0);

        let id = establish(&bob, &alice);

        assert!(id.ends_with(":alice"));
        assert_eq!(bob.store.get(&id).map(|s| s.counter()), Some(0));
        assert_eq!(bob.store.session_for_peer("alice").as_deref(), Some(id.as_str()));
    }

    #[test]
    fn establish_rejects_bad_signature() {
        let alice = Peer::new("alice", 10, 3);
        let bob = Peer::new("bob", 100, 0);
        let mut bundle = alice.bundle();
        bundle.signature[0] ^= 0x01;

        let result = bob.establisher().establish_session(&bob.keyring, &bob.store, "alice", &bundle);

        assert_eq!(result, Err(SessionError::InvalidBundleSignature { user_id: "alice".into() }));
        assert!(bob.store.is_empty());
    }

    #[test]
    fn establish_requires_initialized_keyring() {
        let alice = Peer::new("alice", 10, 3);
        let store = SessionStore::new();
        let result = SessionEstablisher::new(CountingEnv::starting_at(0)).establish_session(
            &IdentityKeyring::new(),
            &store,
            "alice",
            &alice.bundle(),
        );
        assert_eq!(result, Err(SessionError::UninitializedClient));
    }

    #[test]
    fn accept_matches_first_one_time_key() {
        let mut alice = Peer::new("alice", 10, 3);
        let bob = Peer::new("bob", 100, 0);

        let id = establish(&bob, &alice);
        let package = bob.first_package(&id);

        let accepted = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package)
            .unwrap();

        assert_eq!(accepted, id);
        assert_eq!(alice.keyring.one_time_count(), 2);

        let ours = alice.store.get(&id).unwrap();
        let theirs = bob.store.get(&id).unwrap();
        // Bob has already advanced once for the package he sent
        let mut expected = ours.keys().clone();
        expected.advance();
        assert_eq!(&expected, theirs.keys());
    }

    #[test]
    fn accept_matches_later_one_time_key() {
        let mut alice = Peer::new("alice", 10, 3);
        let bob = Peer::new("bob", 100, 0);
        let published = alice.bundle();
        let mut trimmed = published.clone();
        trimmed.one_time_pre_keys.remove(0);

        let establisher = bob.establisher();
        let id = establisher.establish_session(&bob.keyring, &bob.store, "alice", &trimmed).unwrap();
        let package = bob.first_package(&id);
        alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package)
            .unwrap();

        // First key is still in the pool, the second was consumed
        let republished = alice.bundle();
        assert_eq!(republished.one_time_pre_keys.len(), 2);
        assert_eq!(republished.one_time_pre_keys[0], published.one_time_pre_keys[0]);
        assert!(!republished.one_time_pre_keys.contains(&published.one_time_pre_keys[1]));
    }

    #[test]
    fn accept_without_one_time_key() {
        let mut alice = Peer::new("alice", 10, 0);
        let bob = Peer::new("bob", 100, 0);

        let id = establish(&bob, &alice);
        let package = bob.first_package(&id);

        let accepted = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package);
        assert_eq!(accepted, Ok(id));
    }

    #[test]
    fn accept_twice_cannot_reopen_replay() {
        let mut alice = Peer::new("alice", 10, 0);
        let bob = Peer::new("bob", 100, 0);
        let codec = MessageCodec::new(alice.env.clone(), "alice");

        let id = establish(&bob, &alice);
        let package = bob.first_package(&id);
        alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package)
            .unwrap();
        assert_eq!(codec.decrypt(&alice.store, &package).unwrap(), b"hi");

        let again = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package);
        assert_eq!(again, Err(SessionError::SessionExists { session_id: id.clone() }));

        assert!(matches!(
            codec.decrypt(&alice.store, &package),
            Err(SessionError::ReplayDetected { counter: 1, last_accepted: 1, .. })
        ));
        assert_eq!(alice.store.get(&id).map(|s| s.counter()), Some(1));
    }

    #[test]
    fn accept_existing_session_keeps_one_time_key() {
        let mut alice = Peer::new("alice", 10, 2);
        let bob = Peer::new("bob", 100, 0);

        let id = establish(&bob, &alice);
        let package = bob.first_package(&id);
        alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package)
            .unwrap();
        assert_eq!(alice.keyring.one_time_count(), 1);

        // The consumed key is gone, so only the no-key candidate remains and
        // it does not authenticate
        let again = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package);
        assert!(matches!(again, Err(SessionError::MacMismatch { .. })));
        assert_eq!(alice.keyring.one_time_count(), 1);
    }

    #[test]
    fn accept_rejects_forged_package() {
        let mut alice = Peer::new("alice", 10, 2);
        let bob = Peer::new("bob", 100, 0);

        let id = establish(&bob, &alice);
        let mut package = bob.first_package(&id);
        package.ciphertext[0] ^= 0x01;

        let result = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &bob.bundle(), &package);

        assert_eq!(result, Err(SessionError::MacMismatch { session_id: id }));
        assert_eq!(alice.keyring.one_time_count(), 2);
        assert!(alice.store.is_empty());
    }

    #[test]
    fn accept_rejects_impostor_bundle() {
        let mut alice = Peer::new("alice", 10, 2);
        let bob = Peer::new("bob", 100, 0);
        let mallory = Peer::new("bob", 200, 0);

        let id = establish(&bob, &alice);
        let package = bob.first_package(&id);

        // Valid signature, wrong identity: no candidate authenticates
        let result = alice
            .establisher()
            .accept_session(&mut alice.keyring, &alice.store, "bob", &mallory.bundle(), &package);
        assert!(matches!(result, Err(SessionError::MacMismatch { .. })));
    }
}
