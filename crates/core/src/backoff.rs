//! Bounded exponential backoff used between conflicting write attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry budget and delay curve for optimistic-concurrency writes.
///
/// Defaults: 4 attempts, 10ms initial delay growing 5x per retry, up to 10%
/// jitter on top of each delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total write attempts, including the first one.
    pub steps: u32,
    pub initial: Duration,
    pub factor: u32,
    /// Fraction of the delay added as random jitter, in `[0, 1]`.
    pub jitter: f64,
    /// Upper bound for a single delay before jitter.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5,
            jitter: 0.1,
            cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Attempts actually allowed; a zero budget still performs one write.
    pub fn attempts(&self) -> u32 {
        self.steps.max(1)
    }

    /// Delay before retry number `retry` (0-based), given a jitter sample in `[0, 1)`.
    pub fn delay_for(&self, retry: u32, sample: f64) -> Duration {
        let mut base = self.initial;
        for _ in 0..retry {
            base = base.saturating_mul(self.factor.max(1));
            if base >= self.cap {
                base = self.cap;
                break;
            }
        }
        let base = base.min(self.cap);
        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        base + base.mul_f64(jitter)
    }
}

/// Source of jitter samples in `[0, 1)`.
pub trait Jitter: Send + Sync {
    fn sample(&self) -> f64;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl Jitter for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic zero jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}
