#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use parley_core::{IdentityBundle, MessagePackage};

use super::{RelayStore, StoreError};

/// In-memory relay storage for tests, simulation and the CLI
///
/// All state sits behind one `Arc<Mutex<>>`, so clones share it and the
/// check-then-mutate operations are atomic. Nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelayStore {
    inner: Arc<Mutex<MemoryRelayStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryRelayStoreInner {
    /// Latest bundle per user
    bundles: HashMap<String, IdentityBundle>,

    /// One-time prekeys already handed out, per user
    consumed: HashMap<String, BTreeSet<Vec<u8>>>,

    /// Pending packages per recipient, oldest at the front
    queues: HashMap<String, VecDeque<MessagePackage>>,
}

impl MemoryRelayStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of queued packages across all recipients.
    pub fn total_queued(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.queues.values().map(VecDeque::len).sum()
    }
}

impl RelayStore for MemoryRelayStore {
    fn store_bundle(&self, bundle: &IdentityBundle) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if let Some(consumed) = inner.consumed.get_mut(&bundle.user_id) {
            consumed.retain(|key| bundle.one_time_pre_keys.contains(key));
        }
        inner.bundles.insert(bundle.user_id.clone(), bundle.clone());
        Ok(())
    }

    fn load_bundle(&self, user_id: &str) -> Result<Option<IdentityBundle>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.bundles.get(user_id).cloned())
    }

    fn list_users(&self) -> Result<BTreeSet<String>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.bundles.keys().cloned().collect())
    }

    fn consumed_keys(&self, user_id: &str) -> Result<BTreeSet<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.consumed.get(user_id).cloned().unwrap_or_default())
    }

    fn reserve_one_time_key(&self, user_id: &str, key: &[u8]) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.consumed.entry(user_id.to_string()).or_default().insert(key.to_vec()))
    }

    fn append_package(
        &self,
        recipient: &str,
        package: &MessagePackage,
        capacity: usize,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let queue = inner.queues.entry(recipient.to_string()).or_default();
        if queue.len() >= capacity {
            return Ok(false);
        }
        queue.push_back(package.clone());
        Ok(true)
    }

    fn take_packages(&self, recipient: &str) -> Result<Vec<MessagePackage>, StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.queues.remove(recipient).map(Vec::from).unwrap_or_default())
    }

    fn queue_len(&self, recipient: &str) -> Result<usize, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.queues.get(recipient).map_or(0, VecDeque::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(user_id: &str, keys: u8) -> IdentityBundle {
        IdentityBundle {
            user_id: user_id.to_string(),
            identity_key: vec![1; 32],
            pre_key: vec![2; 32],
            one_time_pre_keys: (0..keys).map(|k| vec![k; 32]).collect(),
            signature: vec![3; 64],
        }
    }

    fn package(counter: u64) -> MessagePackage {
        MessagePackage {
            session_id: "s:bob".into(),
            counter,
            iv: vec![0; 12],
            ciphertext: vec![1; 20],
            mac: vec![2; 32],
            sender: "alice".into(),
            recipient: "bob".into(),
            timestamp: counter,
        }
    }

    #[test]
    fn bundles_last_write_wins() {
        let store = MemoryRelayStore::new();
        store.store_bundle(&bundle("alice", 3)).unwrap();
        store.store_bundle(&bundle("alice", 1)).unwrap();

        let loaded = store.load_bundle("alice").unwrap().unwrap();
        assert_eq!(loaded.one_time_pre_keys.len(), 1);
        assert_eq!(store.list_users().unwrap().len(), 1);
        assert!(store.load_bundle("bob").unwrap().is_none());
    }

    #[test]
    fn republish_prunes_unlisted_reservations() {
        let store = MemoryRelayStore::new();
        store.store_bundle(&bundle("alice", 3)).unwrap();
        store.reserve_one_time_key("alice", &[0; 32]).unwrap();
        store.reserve_one_time_key("alice", &[2; 32]).unwrap();

        // Keys 0 and 1 remain listed, key 2 is gone
        store.store_bundle(&bundle("alice", 2)).unwrap();

        let consumed = store.consumed_keys("alice").unwrap();
        assert_eq!(consumed.into_iter().collect::<Vec<_>>(), vec![vec![0; 32]]);
    }

    #[test]
    fn reservation_is_one_shot() {
        let store = MemoryRelayStore::new();
        assert!(store.reserve_one_time_key("alice", &[7; 32]).unwrap());
        assert!(!store.reserve_one_time_key("alice", &[7; 32]).unwrap());
        assert!(store.reserve_one_time_key("bob", &[7; 32]).unwrap());
        assert_eq!(store.consumed_keys("alice").unwrap().len(), 1);
    }

    #[test]
    fn queue_is_bounded_and_ordered() {
        let store = MemoryRelayStore::new();
        assert!(store.append_package("bob", &package(1), 2).unwrap());
        assert!(store.append_package("bob", &package(2), 2).unwrap());
        assert!(!store.append_package("bob", &package(3), 2).unwrap());
        assert_eq!(store.queue_len("bob").unwrap(), 2);

        let drained = store.take_packages("bob").unwrap();
        assert_eq!(drained.iter().map(|p| p.counter).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.queue_len("bob").unwrap(), 0);
        assert_eq!(store.total_queued(), 0);
    }

    #[test]
    fn clone_shares_state() {
        let store1 = MemoryRelayStore::new();
        let store2 = store1.clone();
        store1.store_bundle(&bundle("alice", 0)).unwrap();
        assert!(store2.load_bundle("alice").unwrap().is_some());
    }
}
