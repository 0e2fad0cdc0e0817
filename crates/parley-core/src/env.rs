//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness).
//! Production uses [`crate::SystemEnv`]; tests plug in a seeded RNG and a
//! fixed clock.

use thiserror::Error;

/// The entropy source could not produce bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entropy source failed: {reason}")]
pub struct EntropyError {
    /// Description from the underlying source
    pub reason: String,
}

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `random_bytes()` either fills the whole buffer or returns an error
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;

    /// Milliseconds since the Unix epoch, used for package timestamps.
    fn wall_clock_millis(&self) -> u64;

    /// Generates a random `u128`.
    ///
    /// Used for session identifiers.
    fn random_u128(&self) -> Result<u128, EntropyError> {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes)?;
        Ok(u128::from_be_bytes(bytes))
    }
}
