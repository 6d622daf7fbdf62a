// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Backoff schedule for retryable provider errors.
//!
//! Kept as a pure function of (attempt, server hint) so the schedule can be
//! unit-tested without sleeping.  The caller owns the actual sleeping and
//! cancellation.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial try (0 = never retry).
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Ceiling applied after multiplication and jitter.
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay (0.2 = ±20 %).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` when the
    /// budget is exhausted.
    ///
    /// A server-advertised `retry_after` overrides the exponential schedule
    /// (still clamped to `max_delay`).  `seed` feeds the deterministic
    /// jitter so tests can pin the exact schedule.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>, seed: u64) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        if let Some(hint) = retry_after {
            return Some(hint.min(self.max_delay));
        }
        let base = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
        // Jitter in [-ratio, +ratio], derived from a splitmix64 step so the
        // schedule is reproducible for a given seed.
        let j = unit_from_seed(seed.wrapping_add(attempt as u64));
        let factor = 1.0 + self.jitter_ratio * (2.0 * j - 1.0);
        let millis = (base * factor).min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(millis.max(0.0) as u64))
    }
}

/// Map a seed to a uniform value in [0, 1) via one splitmix64 step.
fn unit_from_seed(seed: u64) -> f64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
