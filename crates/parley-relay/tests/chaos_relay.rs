//! Chaos tests: clients retrying through a relay whose storage randomly fails.
//!
//! Failures must surface as transient relay errors and must never advance
//! or corrupt a session, so plain retries eventually deliver every message.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use parley_core::{
    Client, ClientConfig, ClientError, ReceivedMessage, Relay, SessionStore, SystemEnv,
};
use parley_relay::{ChaoticRelayStore, Mailbox, MemoryRelayStore, RelayConfig};

type ChaosMailbox = Mailbox<ChaoticRelayStore<MemoryRelayStore>>;
type ChaosClient = Client<SystemEnv, Arc<ChaosMailbox>>;

const MAX_ATTEMPTS: usize = 200;

fn retry<T>(what: &str, mut op: impl FnMut() -> Result<T, ClientError>) -> T {
    for _ in 0..MAX_ATTEMPTS {
        match op() {
            Ok(value) => return value,
            Err(ClientError::Relay(err)) if err.is_transient() => {},
            Err(err) => panic!("{what}: non-transient failure: {err}"),
        }
    }
    panic!("{what}: no success after {MAX_ATTEMPTS} attempts");
}

fn chaotic_mailbox(failure_rate: f64, seed: u64) -> Arc<ChaosMailbox> {
    let store = ChaoticRelayStore::with_seed(MemoryRelayStore::new(), failure_rate, seed);
    Arc::new(Mailbox::new(store, RelayConfig::default()))
}

fn client(user: &str, relay: &Arc<ChaosMailbox>) -> ChaosClient {
    let mut client = Client::new(
        user,
        SystemEnv::new(),
        Arc::clone(relay),
        SessionStore::new(),
        ClientConfig::default(),
    );
    if client.initialize().is_err() {
        retry("publish", || client.publish());
    }
    client
}

/// Receive until `expected` messages arrived, retrying rejected packages in
/// order.
fn receive(client: &mut ChaosClient, expected: usize) -> Vec<ReceivedMessage> {
    let mut messages = Vec::new();
    for _ in 0..MAX_ATTEMPTS {
        for result in retry("receive", || client.receive()) {
            match result {
                Ok(message) => messages.push(message),
                Err(rejected) if rejected.is_retryable() => {
                    messages.push(retry("open", || client.open(&rejected.package)));
                },
                Err(rejected) => panic!("package rejected: {}", rejected.error),
            }
        }
        if messages.len() >= expected {
            return messages;
        }
    }
    panic!("received {} of {expected} messages", messages.len());
}

#[test]
fn ping_pong_survives_storage_failures() {
    let relay = chaotic_mailbox(0.25, 7);
    let mut alice = client("alice", &relay);
    let mut bob = client("bob", &relay);

    let session_id = retry("connect", || bob.connect("alice"));

    for round in 0..20u32 {
        let ping = format!("ping {round}");
        retry("send ping", || bob.send("alice", ping.as_bytes()));
        let inbox = receive(&mut alice, 1);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].plaintext, ping.as_bytes());
        assert_eq!(inbox[0].session_id, session_id);

        let pong = format!("pong {round}");
        retry("send pong", || alice.send("bob", pong.as_bytes()));
        let inbox = receive(&mut bob, 1);
        assert_eq!(inbox[0].plaintext, pong.as_bytes());
    }

    // Both sides agree on where the session stands
    let a = alice.store().get(&session_id).unwrap();
    let b = bob.store().get(&session_id).unwrap();
    assert_eq!(a.counter(), 40);
    assert_eq!(a.counter(), b.counter());
    assert_eq!(a.keys(), b.keys());

    assert!(relay.store().failure_count() > 0);
    assert_eq!(relay.store().inner().total_queued(), 0);
}

#[test]
fn bursts_arrive_in_order() {
    let relay = chaotic_mailbox(0.2, 99);
    let mut alice = client("alice", &relay);
    let bob = client("bob", &relay);
    retry("connect", || bob.connect("alice"));

    // First package alone so the session exists before the burst
    retry("send", || bob.send("alice", b"0"));
    receive(&mut alice, 1);

    for i in 1..=10u8 {
        retry("send", || bob.send("alice", &[i]));
    }
    let inbox = receive(&mut alice, 10);
    let counters: Vec<u64> = inbox.iter().map(|m| m.counter).collect();
    assert_eq!(counters, (2..=11).collect::<Vec<_>>());
    assert!(inbox.iter().zip(1u8..).all(|(m, i)| m.plaintext == [i]));
}

#[test]
fn failures_are_reported_as_unavailable() {
    let relay = chaotic_mailbox(1.0, 1);
    let err = relay.list_users().unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, parley_core::RelayError::Unavailable { .. }));
}
