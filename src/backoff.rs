//! Retry delay computation
//!
//! [`BackoffPolicy`] is a pure function from attempt number to delay:
//! exponential growth from `base`, capped at `cap`, with optional full
//! jitter drawn uniformly from `[0, delay)`. [`Backoff`] pairs a policy with
//! an attempt counter and a seedable random source for the retry loops.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Un-jittered delay for `attempt`: `base * 2^attempt`, capped
    pub fn ceiling(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn next<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }

        let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rng.random_range(0..nanos))
    }
}

/// Attempt counter plus random source for one retry loop
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible jitter sequence
    pub fn seeded(policy: BackoffPolicy, seed: u64) -> Self {
        Self {
            policy,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_seed(policy: BackoffPolicy, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(policy, seed),
            None => Self::new(policy),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt, then advance
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.next(self.attempt, &mut self.rng);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Called when a connection or stream is (re-)established
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
