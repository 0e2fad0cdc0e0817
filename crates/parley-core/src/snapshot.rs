//! Session store persistence.
//!
//! A snapshot is a consistent copy of every session plus the peer index,
//! encoded as CBOR. Snapshot files hold live key material: they are written
//! through a temporary file and renamed into place, with mode 0600 on Unix.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::Path,
};

use parley_crypto::{KEY_SIZE, SessionKeys};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

use crate::{
    session::Session,
    store::SessionStore,
    wire::{self, WireError, hex_bytes},
};

/// Errors from saving or loading a snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Filesystem failure
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// CBOR encoding or decoding failed
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Decoded snapshot is internally inconsistent
    #[error("corrupt snapshot: {reason}")]
    Corrupt {
        /// What was wrong
        reason: String,
    },
}

/// Persisted form of one session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Peer the session talks to
    pub peer_id: String,
    /// Current encryption key
    #[serde(with = "hex_bytes")]
    pub encryption_key: Vec<u8>,
    /// Current MAC key
    #[serde(with = "hex_bytes")]
    pub mac_key: Vec<u8>,
    /// Current chain key
    #[serde(with = "hex_bytes")]
    pub chain_key: Vec<u8>,
    /// Counter of the last message sent or accepted
    pub counter: u64,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("peer_id", &self.peer_id)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        self.encryption_key.zeroize();
        self.mac_key.zeroize();
        self.chain_key.zeroize();
    }
}

impl SessionRecord {
    fn from_session(session: &Session) -> Self {
        let keys = session.keys();
        Self {
            peer_id: session.peer_id().to_string(),
            encryption_key: keys.encryption_key().to_vec(),
            mac_key: keys.mac_key().to_vec(),
            chain_key: keys.chain_key().to_vec(),
            counter: session.counter(),
        }
    }

    fn to_session(&self, session_id: &str) -> Result<Session, SnapshotError> {
        let keys = SessionKeys::from_parts(
            key(&self.encryption_key, session_id, "encryption")?,
            key(&self.mac_key, session_id, "mac")?,
            key(&self.chain_key, session_id, "chain")?,
        );
        Ok(Session::restore(session_id.to_string(), self.peer_id.clone(), keys, self.counter))
    }
}

fn key(bytes: &[u8], session_id: &str, role: &str) -> Result<[u8; KEY_SIZE], SnapshotError> {
    bytes.try_into().map_err(|_| SnapshotError::Corrupt {
        reason: format!("{role} key of {session_id} is {} bytes, expected {KEY_SIZE}", bytes.len()),
    })
}

/// Point-in-time copy of a [`SessionStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current session id per peer
    pub peers: BTreeMap<String, String>,
    /// Session state by session id
    pub sessions: BTreeMap<String, SessionRecord>,
}

impl SessionSnapshot {
    /// Encode as CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(wire::encode(self)?)
    }

    /// Decode CBOR produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = wire::decode(bytes)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Write to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");

        let result = write_private(&tmp, &bytes).and_then(|()| fs::rename(&tmp, path));
        bytes.zeroize();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        debug!(path = %path.display(), sessions = self.sessions.len(), "snapshot saved");
        Ok(())
    }

    /// Read a snapshot written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let mut bytes = fs::read(path)?;
        let snapshot = Self::from_bytes(&bytes);
        bytes.zeroize();
        snapshot
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        for (peer_id, session_id) in &self.peers {
            let record = self.sessions.get(session_id).ok_or_else(|| SnapshotError::Corrupt {
                reason: format!("peer {peer_id} points at missing session {session_id}"),
            })?;
            if &record.peer_id != peer_id {
                return Err(SnapshotError::Corrupt {
                    reason: format!("session {session_id} belongs to {}, not {peer_id}", record.peer_id),
                });
            }
        }
        Ok(())
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl SessionStore {
    /// Consistent copy of every session for persistence.
    pub fn snapshot(&self) -> SessionSnapshot {
        let (peers, sessions) = self.entries();
        SessionSnapshot {
            peers: peers.into_iter().collect(),
            sessions: sessions
                .iter()
                .map(|session| (session.id().to_string(), SessionRecord::from_session(session)))
                .collect(),
        }
    }

    /// Load every session from `snapshot` into the store.
    ///
    /// Sessions already present under the same id are replaced. Nothing is
    /// inserted if any record is malformed.
    pub fn restore(&self, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
        snapshot.validate()?;
        let sessions = snapshot
            .sessions
            .iter()
            .map(|(id, record)| record.to_session(id))
            .collect::<Result<Vec<_>, _>>()?;

        let count = sessions.len();
        for session in sessions {
            self.insert(session);
        }
        // insert() binds each peer to whatever session came last; the
        // snapshot's index says which one was current
        let (mut peers, _) = self.entries();
        peers.extend(snapshot.peers.iter().map(|(p, s)| (p.clone(), s.clone())));
        self.set_peers(peers.into_iter().collect::<HashMap<_, _>>());

        debug!(sessions = count, "snapshot restored");
        Ok(())
    }
}
