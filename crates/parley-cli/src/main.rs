//! Parley command-line front end.
//!
//! Hosts several local users on one relay and drives them with line
//! commands read from stdin.
//!
//! # Usage
//!
//! ```bash
//! # In-memory relay, gone on exit
//! parley
//!
//! # Durable relay: bundles, reservations and queues survive restarts
//! parley --relay-db relay.redb --max-queue 500
//! ```

use std::{io, path::PathBuf, sync::Arc};

use clap::Parser;
use parley_cli::Shell;
use parley_core::{ClientConfig, KeyringConfig, Relay};
use parley_relay::{Mailbox, MemoryRelayStore, RedbRelayStore, RelayConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley messaging shell
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "End-to-end encrypted messaging between local Parley users")]
#[command(version)]
struct Args {
    /// One-time prekeys generated per user and kept topped up
    #[arg(long, default_value = "5")]
    one_time_keys: usize,

    /// Maximum packages queued per recipient
    #[arg(long, default_value = "1000")]
    max_queue: usize,

    /// Relay database file; in-memory relay if omitted
    #[arg(long)]
    relay_db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr so they do not interleave with command output
    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let client_config = ClientConfig {
        keyring: KeyringConfig { one_time_pre_keys: args.one_time_keys },
        ..ClientConfig::default()
    };
    let relay_config = RelayConfig { max_queue_len: args.max_queue };

    match &args.relay_db {
        Some(path) => {
            tracing::info!("Relay database at {}", path.display());
            let store = RedbRelayStore::open(path)?;
            run(Mailbox::new(store, relay_config), client_config)?;
        },
        None => {
            tracing::info!("Using in-memory relay");
            run(Mailbox::new(MemoryRelayStore::new(), relay_config), client_config)?;
        },
    }
    Ok(())
}

fn run(relay: impl Relay, config: ClientConfig) -> io::Result<()> {
    let mut shell = Shell::new(Arc::new(relay), config);
    shell.run(io::stdin().lock(), &mut io::stdout().lock())
}
