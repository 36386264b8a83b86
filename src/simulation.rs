//! Simulated backend behaviour: variable latency and injected failures

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Backend work takes a uniform number of milliseconds in this range.
pub const WORK_MILLIS: Range<u64> = 50..250;

/// Probability that a greeting is replaced with a synthetic 500.
pub const FAILURE_RATE: f64 = 0.05;

/// Source of randomness for the demo handler, injectable so tests can pin both branches.
pub trait RandomSource: Send + Sync {
    /// Milliseconds of simulated work, within [`WORK_MILLIS`].
    fn work_millis(&self) -> u64;

    /// Uniform draw in [0, 1).
    fn unit(&self) -> f64;

    fn work_duration(&self) -> Duration {
        Duration::from_millis(self.work_millis())
    }

    fn should_fail(&self) -> bool {
        self.unit() < FAILURE_RATE
    }
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn work_millis(&self) -> u64 {
        rand::thread_rng().gen_range(WORK_MILLIS)
    }

    fn unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic source returning the same draws every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom {
    pub work_millis: u64,
    pub unit: f64,
}

impl FixedRandom {
    /// Shortest work, never fails.
    pub fn succeeding() -> Self {
        Self {
            work_millis: WORK_MILLIS.start,
            unit: 0.99,
        }
    }

    /// Shortest work, always takes the failure branch.
    pub fn failing() -> Self {
        Self {
            work_millis: WORK_MILLIS.start,
            unit: 0.0,
        }
    }
}

impl RandomSource for FixedRandom {
    fn work_millis(&self) -> u64 {
        self.work_millis
    }

    fn unit(&self) -> f64 {
        self.unit
    }
}
