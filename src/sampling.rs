//! The single non-determinism seam for the simulator.
//!
//! Both the calibration pass/fail draw and the synthetic measurement values
//! go through [`Sampler`], so tests (and a future port against real
//! instrument feedback) swap one implementation instead of chasing scattered
//! `rand` calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

pub trait Sampler: Send + Sync {
    /// Pass/fail draw for a calibration step.
    fn step_passes(&self, success_rate_percent: u8) -> bool;

    /// Uniform draw from `[low, high)`.
    fn uniform(&self, low: f64, high: f64) -> f64;

    /// Acquisition latency draw from `[min, max]`.
    fn acquisition_delay(&self, min: Duration, max: Duration) -> Duration;
}

/// Production sampler backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn step_passes(&self, success_rate_percent: u8) -> bool {
        rand::rng().random_range(0..100) < i32::from(success_rate_percent)
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        rand::rng().random_range(low..high)
    }

    fn acquisition_delay(&self, min: Duration, max: Duration) -> Duration {
        let low = min.as_millis() as u64;
        let high = (max.as_millis() as u64).max(low);
        Duration::from_millis(rand::rng().random_range(low..=high))
    }
}

/// Deterministic sampler for tests and forced demo modes.
///
/// Step outcomes are popped from a queue, falling back to `default_outcome`
/// once the queue is empty. Value draws return the range midpoint and latency
/// draws return the range minimum.
#[derive(Debug)]
pub struct ScriptedSampler {
    outcomes: Mutex<VecDeque<bool>>,
    default_outcome: bool,
}

impl ScriptedSampler {
    pub fn passing() -> Self {
        Self::with_outcomes([], true)
    }

    pub fn failing() -> Self {
        Self::with_outcomes([], false)
    }

    pub fn with_outcomes(outcomes: impl IntoIterator<Item = bool>, default_outcome: bool) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            default_outcome,
        }
    }
}

impl Sampler for ScriptedSampler {
    fn step_passes(&self, _success_rate_percent: u8) -> bool {
        self.outcomes
            .lock()
            .expect("scripted outcomes mutex poisoned")
            .pop_front()
            .unwrap_or(self.default_outcome)
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        (low + high) / 2.0
    }

    fn acquisition_delay(&self, min: Duration, _max: Duration) -> Duration {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_sampler_stays_in_range() {
        let sampler = RandomSampler;
        for _ in 0..100 {
            let value = sampler.uniform(7.35, 7.45);
            assert!((7.35..7.45).contains(&value));
        }
        let delay =
            sampler.acquisition_delay(Duration::from_millis(3000), Duration::from_millis(5000));
        assert!(delay >= Duration::from_millis(3000) && delay <= Duration::from_millis(5000));
    }

    #[test]
    fn step_rate_extremes_are_deterministic() {
        let sampler = RandomSampler;
        assert!(!sampler.step_passes(0));
        assert!(sampler.step_passes(100));
    }

    #[test]
    fn scripted_sampler_replays_outcomes_then_defaults() {
        let sampler = ScriptedSampler::with_outcomes([true, false], true);
        assert!(sampler.step_passes(90));
        assert!(!sampler.step_passes(90));
        assert!(sampler.step_passes(90));
        assert_eq!(sampler.uniform(2.0, 4.0), 3.0);
    }
}
