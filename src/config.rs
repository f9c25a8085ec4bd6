//! Tree configuration.
//!
//! The plain operations (`get`, `insert`, `remove`) retry until they succeed
//! and ignore the retry budget. The `try_*` variants honor
//! [`TreeConfig::max_retries`] and report exhaustion as
//! [`TreeError::RetryLimitExceeded`](crate::TreeError::RetryLimitExceeded).
//!
//! # Environment
//!
//! [`TreeConfig::from_env`] reads:
//!
//! - `PAVTREE_MAX_RETRIES` - retry budget for `try_*` operations
//! - `PAVTREE_BACKOFF_SPINS` - spins before yielding when a multi-node lock
//!   acquisition backs off
//!
//! Unset or unparsable values fall back to the defaults.

use std::env;

/// Default number of `spin_loop` hints before a backing-off writer yields.
pub const DEFAULT_BACKOFF_SPINS: u32 = 64;

/// Tunables for a [`PavtTree`](crate::PavtTree).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    max_retries: Option<u32>,
    backoff_spins: u32,
}

impl TreeConfig {
    /// Unbounded retries, default backoff.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: None,
            backoff_spins: DEFAULT_BACKOFF_SPINS,
        }
    }

    /// Read the configuration from `PAVTREE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(max) = parse_var("PAVTREE_MAX_RETRIES") {
            config.max_retries = Some(max);
        }
        if let Some(spins) = parse_var("PAVTREE_BACKOFF_SPINS") {
            config.backoff_spins = spins;
        }
        config
    }

    /// Bound the attempts a `try_*` operation makes before giving up.
    ///
    /// A budget of 0 is treated as 1: every operation makes at least one
    /// attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(if max == 0 { 1 } else { max });
        self
    }

    /// Remove the retry bound.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Spins before yielding during lock backoff.
    #[must_use]
    pub const fn with_backoff_spins(mut self, spins: u32) -> Self {
        self.backoff_spins = spins;
        self
    }

    /// Attempt budget for `try_*` operations, `None` if unbounded.
    #[must_use]
    pub const fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Spins before yielding during lock backoff.
    #[must_use]
    pub const fn backoff_spins(&self) -> u32 {
        self.backoff_spins
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var(name: &str) -> Option<u32> {
    env::var(name).ok()?.trim().parse().ok()
}

/// Spin-then-yield backoff for contended multi-lock acquisition.
#[derive(Debug)]
pub(crate) struct Backoff {
    spins: u32,
    limit: u32,
}

impl Backoff {
    pub(crate) const fn new(limit: u32) -> Self {
        Self { spins: 0, limit }
    }

    pub(crate) fn snooze(&mut self) {
        if self.spins < self.limit {
            // Doubling spin count, capped at the limit.
            let burst = (self.spins + 1).min(self.limit - self.spins);
            for _ in 0..burst {
                std::hint::spin_loop();
            }
            self.spins += burst;
        } else {
            std::thread::yield_now();
        }
    }
}
