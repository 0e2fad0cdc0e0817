//! Shared fixtures: seeded environment and an in-process relay.

#![allow(dead_code, clippy::unwrap_used)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parley_core::{
    Client, ClientConfig, EntropyError, Environment, IdentityBundle, MessagePackage, Relay,
    RelayError, SessionStore,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic environment: seeded ChaCha20 and a clock that ticks once
/// per read.
#[derive(Clone)]
pub struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    clock: Arc<AtomicU64>,
}

impl TestEnv {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            clock: Arc::new(AtomicU64::new(1_700_000_000_000)),
        }
    }
}

impl Environment for TestEnv {
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.rng.lock().unwrap().fill_bytes(buffer);
        Ok(())
    }

    fn wall_clock_millis(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// Relay kept in process memory, with a switch to simulate an outage.
#[derive(Default)]
pub struct TestRelay {
    bundles: Mutex<BTreeMap<String, IdentityBundle>>,
    consumed: Mutex<HashSet<Vec<u8>>>,
    queues: Mutex<HashMap<String, Vec<MessagePackage>>>,
    down: AtomicBool,
}

impl TestRelay {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }

    pub fn queued(&self, user_id: &str) -> usize {
        self.queues.lock().unwrap().get(user_id).map_or(0, Vec::len)
    }

    fn check(&self) -> Result<(), RelayError> {
        if self.down.load(Ordering::Relaxed) {
            return Err(RelayError::Unavailable { reason: "simulated outage".into() });
        }
        Ok(())
    }

    fn lookup(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        let mut bundle = self
            .bundles
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound { user_id: user_id.into() })?;
        let consumed = self.consumed.lock().unwrap();
        bundle.one_time_pre_keys.retain(|k| !consumed.contains(k));
        Ok(bundle)
    }
}

impl Relay for TestRelay {
    fn publish(&self, bundle: IdentityBundle) -> Result<(), RelayError> {
        self.check()?;
        self.bundles.lock().unwrap().insert(bundle.user_id.clone(), bundle);
        Ok(())
    }

    fn fetch(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        self.check()?;
        let bundle = self.lookup(user_id)?;
        if let Some(key) = bundle.first_one_time_pre_key() {
            self.consumed.lock().unwrap().insert(key.to_vec());
        }
        Ok(bundle)
    }

    fn peek(&self, user_id: &str) -> Result<IdentityBundle, RelayError> {
        self.check()?;
        self.lookup(user_id)
    }

    fn enqueue(&self, recipient: &str, package: MessagePackage) -> Result<(), RelayError> {
        self.check()?;
        self.queues.lock().unwrap().entry(recipient.into()).or_default().push(package);
        Ok(())
    }

    fn drain(&self, user_id: &str) -> Result<Vec<MessagePackage>, RelayError> {
        self.check()?;
        Ok(self.queues.lock().unwrap().remove(user_id).unwrap_or_default())
    }

    fn list_users(&self) -> Result<BTreeSet<String>, RelayError> {
        self.check()?;
        Ok(self.bundles.lock().unwrap().keys().cloned().collect())
    }
}

pub type TestClient = Client<TestEnv, Arc<TestRelay>>;

/// Initialized client registered with `relay`.
pub fn client(user_id: &str, seed: u64, relay: &Arc<TestRelay>) -> TestClient {
    let mut client = Client::new(
        user_id,
        TestEnv::seeded(seed),
        Arc::clone(relay),
        SessionStore::new(),
        ClientConfig::default(),
    );
    client.initialize().unwrap();
    client
}
