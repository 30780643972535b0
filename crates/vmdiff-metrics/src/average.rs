//! Exponentially decaying average

use std::sync::atomic::{AtomicU64, Ordering};

/// Weight of the previous average
const DECAY: f64 = 0.95;

/// Lock-free weighted moving average. Each sample moves the average 5% toward it.
#[derive(Debug)]
pub struct SlidingAverage {
    bits: AtomicU64,
}

impl SlidingAverage {
    /// Create an empty average
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Add a sample; the first sample seeds the average
    pub fn add(&self, sample: f64) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if current.is_nan() {
                    sample
                } else {
                    DECAY * current + (1.0 - DECAY) * sample
                };
                Some(next.to_bits())
            });
    }

    /// Current average, 0 before any sample
    pub fn avg(&self) -> f64 {
        let value = f64::from_bits(self.bits.load(Ordering::Relaxed));
        if value.is_nan() {
            0.0
        } else {
            value
        }
    }
}

impl Default for SlidingAverage {
    fn default() -> Self {
        Self::new()
    }
}
