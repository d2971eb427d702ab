//! Reconnect delays.

use std::time::Duration;

/// Exponential delay between connection attempts.
///
/// Starts at [`Backoff::INITIAL`] and doubles after every failed attempt,
/// up to [`Backoff::MAX`]. A successful connection resets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub const INITIAL: Duration = Duration::from_secs(5);
    pub const MAX: Duration = Duration::from_secs(300);

    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the delay before the next attempt and doubles the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(Self::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
