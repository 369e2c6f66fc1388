//! Randomised eye-blink cycle.

use crate::config::BlinkConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Blink timer and curve.
///
/// Time since the last blink accumulates every frame; once it exceeds a
/// threshold drawn from `[min, max)` a blink starts, the accumulator resets
/// and a fresh threshold is drawn. A blink's influence follows
/// `sin(progress * PI)` over `duration`, then snaps back to 0.
#[derive(Debug)]
pub struct BlinkCycle<R = StdRng> {
    min: f32,
    max: f32,
    duration: f32,
    since_last: f32,
    threshold: f32,
    blinking: Option<f32>,
    blinks: u64,
    rng: R,
}

impl BlinkCycle<StdRng> {
    pub fn new(config: &BlinkConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic cycle for tests and replays.
    pub fn seeded(config: &BlinkConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> BlinkCycle<R> {
    pub fn with_rng(config: &BlinkConfig, rng: R) -> Self {
        let min = config.min_interval_secs.max(0.0);
        let max = config.max_interval_secs.max(min);
        let mut cycle = Self {
            min,
            max,
            duration: config.duration_secs.max(f32::EPSILON),
            since_last: 0.0,
            threshold: min,
            blinking: None,
            blinks: 0,
            rng,
        };
        cycle.threshold = cycle.draw_threshold();
        cycle
    }

    fn draw_threshold(&mut self) -> f32 {
        if self.max > self.min {
            self.rng.gen_range(self.min..self.max)
        } else {
            self.min
        }
    }

    /// Threshold for the blink currently being waited for.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Blinks started so far.
    pub fn blinks(&self) -> u64 {
        self.blinks
    }

    pub fn is_blinking(&self) -> bool {
        self.blinking.is_some()
    }

    /// Advance by `dt` seconds.
    ///
    /// Returns the eye influence while a blink is in progress (including the
    /// frame it starts on and the frame it returns to 0), `None` otherwise.
    pub fn update(&mut self, dt: f32) -> Option<f32> {
        self.since_last += dt;

        if let Some(elapsed) = self.blinking.as_mut() {
            *elapsed += dt;
            let progress = (*elapsed / self.duration).min(1.0);
            if progress >= 1.0 {
                self.blinking = None;
                return Some(0.0);
            }
            return Some((progress * PI).sin());
        }

        if self.since_last > self.threshold {
            self.since_last = 0.0;
            self.threshold = self.draw_threshold();
            self.blinking = Some(0.0);
            self.blinks += 1;
            return Some(0.0);
        }
        None
    }
}
