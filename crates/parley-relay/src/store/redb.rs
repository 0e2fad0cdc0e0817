//! Redb-backed durable relay storage.
//!
//! Uses Redb's ACID transactions, so published bundles, reservations and
//! queued packages survive a relay restart. Check-then-mutate operations run
//! inside a single write transaction.

use std::{collections::BTreeSet, path::Path, sync::Arc};

use parley_core::{IdentityBundle, MessagePackage};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{RelayStore, StoreError};

/// Table: bundles
/// Key: user id
/// Value: CBOR-encoded IdentityBundle
const BUNDLES: TableDefinition<&str, &[u8]> = TableDefinition::new("bundles");

/// Table: consumed
/// Key: length-prefixed user id followed by the one-time prekey bytes
/// Value: empty
const CONSUMED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("consumed");

/// Table: queues
/// Key: length-prefixed user id followed by a big-endian sequence number
/// Value: CBOR-encoded MessagePackage
const QUEUES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("queues");

const EMPTY: &[u8] = &[];

/// Durable relay storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbRelayStore {
    db: Arc<Database>,
}

impl RedbRelayStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(BUNDLES).map_err(io)?;
            let _ = txn.open_table(CONSUMED).map_err(io)?;
            let _ = txn.open_table(QUEUES).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl RelayStore for RedbRelayStore {
    fn store_bundle(&self, bundle: &IdentityBundle) -> Result<(), StoreError> {
        let bytes = encode(bundle)?;
        let prefix = user_prefix(&bundle.user_id);
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(BUNDLES).map_err(io)?;
            table.insert(bundle.user_id.as_str(), bytes.as_slice()).map_err(io)?;

            let mut consumed = txn.open_table(CONSUMED).map_err(io)?;
            let mut unlisted = Vec::new();
            for entry in consumed.range(prefix.as_slice()..).map_err(io)? {
                let (key, _) = entry.map_err(io)?;
                let Some(one_time_key) = key.value().strip_prefix(prefix.as_slice()) else {
                    break;
                };
                if !bundle.one_time_pre_keys.iter().any(|listed| listed == one_time_key) {
                    unlisted.push(key.value().to_vec());
                }
            }
            for key in &unlisted {
                consumed.remove(key.as_slice()).map_err(io)?;
            }
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_bundle(&self, user_id: &str) -> Result<Option<IdentityBundle>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(BUNDLES).map_err(io)?;

        match table.get(user_id).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_users(&self) -> Result<BTreeSet<String>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(BUNDLES).map_err(io)?;

        let mut users = BTreeSet::new();
        for entry in table.iter().map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            users.insert(key.value().to_string());
        }
        Ok(users)
    }

    fn consumed_keys(&self, user_id: &str) -> Result<BTreeSet<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONSUMED).map_err(io)?;

        let prefix = user_prefix(user_id);
        let mut keys = BTreeSet::new();
        for entry in table.range(prefix.as_slice()..).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let Some(one_time_key) = key.value().strip_prefix(prefix.as_slice()) else {
                break;
            };
            keys.insert(one_time_key.to_vec());
        }
        Ok(keys)
    }

    fn reserve_one_time_key(&self, user_id: &str, key: &[u8]) -> Result<bool, StoreError> {
        let mut entry = user_prefix(user_id);
        entry.extend_from_slice(key);

        let txn = self.db.begin_write().map_err(io)?;
        let reserved = {
            let mut table = txn.open_table(CONSUMED).map_err(io)?;
            let previous = table.insert(entry.as_slice(), EMPTY).map_err(io)?;
            previous.is_none()
        };
        txn.commit().map_err(io)?;
        Ok(reserved)
    }

    fn append_package(
        &self,
        recipient: &str,
        package: &MessagePackage,
        capacity: usize,
    ) -> Result<bool, StoreError> {
        let bytes = encode(package)?;
        let (start, end) = queue_bounds(recipient);

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(QUEUES).map_err(io)?;

            let mut len = 0usize;
            let mut last = None;
            for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
                let (key, _) = entry.map_err(io)?;
                last = Some(decode_sequence(key.value())?);
                len += 1;
            }
            if len >= capacity {
                return Ok(false);
            }

            let next = last.map_or(0, |seq| seq + 1);
            let key = queue_key(recipient, next);
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn take_packages(&self, recipient: &str) -> Result<Vec<MessagePackage>, StoreError> {
        let (start, end) = queue_bounds(recipient);

        let txn = self.db.begin_write().map_err(io)?;
        let packages = {
            let mut table = txn.open_table(QUEUES).map_err(io)?;

            let mut keys = Vec::new();
            let mut packages = Vec::new();
            for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
                let (key, value) = entry.map_err(io)?;
                keys.push(key.value().to_vec());
                packages.push(decode(value.value())?);
            }
            for key in &keys {
                table.remove(key.as_slice()).map_err(io)?;
            }
            packages
        };
        txn.commit().map_err(io)?;
        Ok(packages)
    }

    fn queue_len(&self, recipient: &str) -> Result<usize, StoreError> {
        let (start, end) = queue_bounds(recipient);
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(QUEUES).map_err(io)?;

        let mut len = 0;
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            entry.map_err(io)?;
            len += 1;
        }
        Ok(len)
    }
}

impl std::fmt::Debug for RedbRelayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRelayStore").finish_non_exhaustive()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn io(err: impl ToString) -> StoreError {
    StoreError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// `len(user_id) as u32 BE || user_id`
///
/// The length prefix keeps one user's keys from being a prefix of another's.
fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + user_id.len() + 32);
    key.extend_from_slice(&(user_id.len() as u32).to_be_bytes());
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn queue_key(recipient: &str, sequence: u64) -> Vec<u8> {
    let mut key = user_prefix(recipient);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn queue_bounds(recipient: &str) -> (Vec<u8>, Vec<u8>) {
    (queue_key(recipient, 0), queue_key(recipient, u64::MAX))
}

fn decode_sequence(key: &[u8]) -> Result<u64, StoreError> {
    key.len()
        .checked_sub(8)
        .and_then(|split| key[split..].try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StoreError::Serialization(format!("malformed queue key of {} bytes", key.len())))
}
