//! Identity keyring: the local user's private key material.

use parley_crypto::{IdentityKeyPair, KeyRole, PUBLIC_KEY_SIZE, PreKeyPair, SEED_SIZE};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{bundle::IdentityBundle, env::Environment, error::SessionError};

/// Default size of the one-time prekey pool.
pub const DEFAULT_ONE_TIME_PRE_KEYS: usize = 5;

/// Keyring configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringConfig {
    /// One-time prekeys generated at initialization
    pub one_time_pre_keys: usize,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self { one_time_pre_keys: DEFAULT_ONE_TIME_PRE_KEYS }
    }
}

/// Generates key pairs from the environment's entropy source.
#[derive(Debug, Clone)]
pub struct KeyPairFactory<E: Environment> {
    env: E,
}

impl<E: Environment> KeyPairFactory<E> {
    /// Create a factory drawing entropy from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Generate an identity key pair.
    pub fn identity(&self) -> Result<IdentityKeyPair, SessionError> {
        let seed = self.seed(KeyRole::Identity)?;
        Ok(IdentityKeyPair::from_seed(&seed))
    }

    /// Generate a prekey or one-time prekey pair.
    pub fn pre_key(&self, role: KeyRole) -> Result<PreKeyPair, SessionError> {
        let seed = self.seed(role)?;
        Ok(PreKeyPair::from_seed(&seed))
    }

    fn seed(&self, role: KeyRole) -> Result<Zeroizing<[u8; SEED_SIZE]>, SessionError> {
        let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
        self.env.random_bytes(seed.as_mut()).map_err(|e| SessionError::KeyGenerationFailure {
            reason: format!("{role} key: {}", e.reason),
        })?;
        Ok(seed)
    }
}

/// Owns the local identity pair, signed prekey and one-time prekey pool.
///
/// Private keys never leave the keyring; agreement code borrows them.
///
/// # Invariants
///
/// - Either fully initialized or holding no key material at all
/// - A one-time prekey taken for a session is removed from the pool and
///   never offered again
#[derive(Debug, Default)]
pub struct IdentityKeyring {
    material: Option<KeyMaterial>,
}

#[derive(Debug)]
struct KeyMaterial {
    identity: IdentityKeyPair,
    pre_key: PreKeyPair,
    one_time_pre_keys: Vec<PreKeyPair>,
}

impl IdentityKeyring {
    /// Create an empty, uninitialized keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate identity, prekey and `one_time_count` one-time prekeys.
    ///
    /// Replaces any existing material. On failure the keyring is unchanged.
    pub fn initialize<E: Environment>(
        &mut self,
        factory: &KeyPairFactory<E>,
        one_time_count: usize,
    ) -> Result<(), SessionError> {
        let identity = factory.identity()?;
        let pre_key = factory.pre_key(KeyRole::PreKey)?;
        let one_time_pre_keys = (0..one_time_count)
            .map(|_| factory.pre_key(KeyRole::OneTimePreKey))
            .collect::<Result<Vec<_>, _>>()?;

        self.material = Some(KeyMaterial { identity, pre_key, one_time_pre_keys });
        debug!(one_time_count, "keyring initialized");
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.material.is_some()
    }

    /// Signed bundle for publishing under `user_id`.
    pub fn create_registration_bundle(&self, user_id: &str) -> Result<IdentityBundle, SessionError> {
        let material = self.material()?;
        let pre_key = material.pre_key.public_bytes();

        Ok(IdentityBundle {
            user_id: user_id.to_string(),
            identity_key: material.identity.public_bytes().to_vec(),
            pre_key: pre_key.to_vec(),
            one_time_pre_keys: material
                .one_time_pre_keys
                .iter()
                .map(|pair| pair.public_bytes().to_vec())
                .collect(),
            signature: material.identity.sign(&pre_key).to_vec(),
        })
    }

    /// Add one-time prekeys to the pool. Returns the new pool size.
    pub fn replenish<E: Environment>(
        &mut self,
        factory: &KeyPairFactory<E>,
        count: usize,
    ) -> Result<usize, SessionError> {
        // Generate first so a failure leaves the pool untouched
        let fresh = (0..count)
            .map(|_| factory.pre_key(KeyRole::OneTimePreKey))
            .collect::<Result<Vec<_>, _>>()?;

        let material = self.material.as_mut().ok_or(SessionError::UninitializedClient)?;
        material.one_time_pre_keys.extend(fresh);
        debug!(added = count, pool = material.one_time_pre_keys.len(), "one-time prekeys replenished");
        Ok(material.one_time_pre_keys.len())
    }

    /// Number of one-time prekeys still in the pool.
    pub fn one_time_count(&self) -> usize {
        self.material.as_ref().map_or(0, |m| m.one_time_pre_keys.len())
    }

    pub(crate) fn identity(&self) -> Result<&IdentityKeyPair, SessionError> {
        Ok(&self.material()?.identity)
    }

    pub(crate) fn pre_key(&self) -> Result<&PreKeyPair, SessionError> {
        Ok(&self.material()?.pre_key)
    }

    pub(crate) fn one_time_pre_keys(&self) -> &[PreKeyPair] {
        self.material.as_ref().map_or(&[], |m| m.one_time_pre_keys.as_slice())
    }

    /// Remove and return the one-time pair with this public key.
    pub(crate) fn take_one_time_pre_key(
        &mut self,
        public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Option<PreKeyPair> {
        let pool = &mut self.material.as_mut()?.one_time_pre_keys;
        let index = pool.iter().position(|pair| &pair.public_bytes() == public)?;
        Some(pool.remove(index))
    }

    fn material(&self) -> Result<&KeyMaterial, SessionError> {
        self.material.as_ref().ok_or(SessionError::UninitializedClient)
    }
}
