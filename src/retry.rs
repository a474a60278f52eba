//! Retry policy with bounded, jittered exponential backoff

use crate::error::StreamError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for cache reads
///
/// The nominal delay doubles from `initial_delay` and is capped at
/// `max_delay`. Each actual sleep is drawn uniformly from
/// `[nominal / 2, nominal]` so that many callers hitting the same outage do
/// not retry in lockstep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Same policy with a different retry ceiling
    pub fn with_max_retries(&self, max_retries: usize) -> Self {
        RetryPolicy {
            max_retries,
            ..self.clone()
        }
    }

    /// Check if we should retry based on the attempt number and error
    ///
    /// `attempt` is zero-based: attempt 0 is the first call.
    pub fn should_retry(&self, attempt: usize, error: &StreamError) -> bool {
        attempt < self.max_retries && error.should_retry()
    }

    /// Nominal (un-jittered) backoff before retry number `attempt + 1`
    pub fn backoff_cap(&self, attempt: usize) -> Duration {
        let shift = attempt.min(32) as u32;
        let ms = self
            .initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Jittered backoff, always within `[cap / 2, cap]`
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let cap = self.backoff_cap(attempt).as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(cap / 2..=cap);
        Duration::from_millis(ms)
    }
}
