//! Fault-injecting relay store for chaos tests
//!
//! Wraps another store and fails a seeded fraction of operations before they
//! reach it, so a failed call never half-applies.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use parley_core::{IdentityBundle, MessagePackage};

use super::{RelayStore, StoreError};

/// Relay store wrapper that randomly rejects operations
///
/// Failure decisions come from a seeded generator shared by all clones, so a
/// single-threaded test run is reproducible.
#[derive(Clone)]
pub struct ChaoticRelayStore<S: RelayStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

/// Linear congruential generator; deterministic for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = A.wrapping_mul(self.state).wrapping_add(C) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: RelayStore> ChaoticRelayStore<S> {
    /// Wrap `inner` with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x5EED_C4A0_5EED_C4A0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng { state: seed })),
            operations: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Operations attempted so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::Relaxed)
    }

    /// Operations that were failed on purpose.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn inject(&self) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").next() < self.failure_rate;
        if fail {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: RelayStore> RelayStore for ChaoticRelayStore<S> {
    fn store_bundle(&self, bundle: &IdentityBundle) -> Result<(), StoreError> {
        self.inject()?;
        self.inner.store_bundle(bundle)
    }

    fn load_bundle(&self, user_id: &str) -> Result<Option<IdentityBundle>, StoreError> {
        self.inject()?;
        self.inner.load_bundle(user_id)
    }

    fn list_users(&self) -> Result<BTreeSet<String>, StoreError> {
        self.inject()?;
        self.inner.list_users()
    }

    fn consumed_keys(&self, user_id: &str) -> Result<BTreeSet<Vec<u8>>, StoreError> {
        self.inject()?;
        self.inner.consumed_keys(user_id)
    }

    fn reserve_one_time_key(&self, user_id: &str, key: &[u8]) -> Result<bool, StoreError> {
        self.inject()?;
        self.inner.reserve_one_time_key(user_id, key)
    }

    fn append_package(
        &self,
        recipient: &str,
        package: &MessagePackage,
        capacity: usize,
    ) -> Result<bool, StoreError> {
        self.inject()?;
        self.inner.append_package(recipient, package, capacity)
    }

    fn take_packages(&self, recipient: &str) -> Result<Vec<MessagePackage>, StoreError> {
        self.inject()?;
        self.inner.take_packages(recipient)
    }

    fn queue_len(&self, recipient: &str) -> Result<usize, StoreError> {
        self.inject()?;
        self.inner.queue_len(recipient)
    }
}
