//! Production Environment implementation using system time and RNG.
//!
//! # Capabilities
//!
//! - Real wall-clock time for package timestamps
//! - OS cryptographic RNG (getrandom). Truly random, not reproducible

use std::time::{SystemTime, UNIX_EPOCH};

use crate::env::{EntropyError, Environment};

/// Production environment using the system clock and cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Suitable for
/// key seeds, IVs and session identifiers. An RNG failure surfaces as
/// [`EntropyError`] so key generation can report it instead of continuing
/// with weak material.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| EntropyError { reason: e.to_string() })
    }

    fn wall_clock_millis(&self) -> u64 {
        // A clock before 1970 yields 0 rather than failing the send
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}
