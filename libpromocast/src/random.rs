//! Injectable randomness
//!
//! Hashtag sampling, candidate choice, simulated outcomes and engagement
//! drift all draw from a [`RandomSource`], so tests can pin them down.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Uniform float in `[0, 1)`
    fn next_f64(&self) -> f64;

    /// Uniform integer in the inclusive range
    fn range(&self, range: RangeInclusive<u32>) -> u32;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn index(&self, len: usize) -> usize;

    /// Bernoulli trial with probability `p`
    fn chance(&self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Thread-local generator, the production default
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn range(&self, range: RangeInclusive<u32>) -> u32 {
        rand::thread_rng().gen_range(range)
    }

    fn index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Deterministic generator for reproducible runs
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.with_rng(|rng| rng.gen::<f64>())
    }

    fn range(&self, range: RangeInclusive<u32>) -> u32 {
        self.with_rng(|rng| rng.gen_range(range))
    }

    fn index(&self, len: usize) -> usize {
        self.with_rng(|rng| rng.gen_range(0..len))
    }
}

/// Replays a fixed script of floats; every draw is derived from the next one.
///
/// Once the script runs out the last value repeats. An empty script behaves
/// like a constant `0.0`.
#[derive(Debug)]
pub struct ScriptedRandom {
    values: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedRandom {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
            last: Mutex::new(0.0),
        }
    }

    /// Always yields `value`
    pub fn constant(value: f64) -> Self {
        Self::new([value])
    }

    fn draw(&self) -> f64 {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(next) = values.pop_front() {
            *last = next.clamp(0.0, 0.999_999);
        }
        *last
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&self) -> f64 {
        self.draw()
    }

    fn range(&self, range: RangeInclusive<u32>) -> u32 {
        let (lo, hi) = (*range.start(), *range.end());
        if hi <= lo {
            return lo;
        }
        let span = f64::from(hi - lo + 1);
        lo + (self.draw() * span) as u32
    }

    fn index(&self, len: usize) -> usize {
        ((self.draw() * len as f64) as usize).min(len.saturating_sub(1))
    }
}
