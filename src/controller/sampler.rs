use std::collections::VecDeque;

use crate::config::{ReadingConfig, SmoothingType};

/// Smoothing buffer: maps raw meter readings to smoothed samples.
///
/// Holds at most `max(1, smoothing_sample_size)` recent offset-adjusted
/// readings; the oldest is evicted once the window is full.
pub struct Sampler {
    offset: f64,
    smoothing: SmoothingType,
    capacity: usize,
    window: VecDeque<f64>,
}

impl Sampler {
    pub fn new(config: &ReadingConfig) -> Self {
        Self {
            offset: config.offset,
            smoothing: config.smoothing,
            capacity: (config.smoothing_sample_size as usize).max(1),
            window: VecDeque::with_capacity((config.smoothing_sample_size as usize).max(1)),
        }
    }

    /// Append `raw + offset` to the window and return the current sample.
    pub fn sample(&mut self, raw: f64) -> f64 {
        let x = raw + self.offset;

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(x);

        match self.smoothing {
            SmoothingType::Avg => self.window.iter().sum::<f64>() / self.window.len() as f64,
            SmoothingType::None => *self.window.back().expect("just pushed"),
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(smoothing: SmoothingType, sample_size: u32, offset: f64) -> ReadingConfig {
        ReadingConfig {
            smoothing,
            smoothing_sample_size: sample_size,
            offset,
        }
    }

    #[test]
    fn none_smoothing_returns_offset_reading() {
        let mut sampler = Sampler::new(&config(SmoothingType::None, 5, 2.5));
        assert_eq!(sampler.sample(100.0), 102.5);
        assert_eq!(sampler.sample(50.0), 52.5);
    }

    #[test]
    fn avg_smoothing_means_the_window() {
        let mut sampler = Sampler::new(&config(SmoothingType::Avg, 3, 0.0));
        assert_eq!(sampler.sample(10.0), 10.0);
        assert_eq!(sampler.sample(20.0), 15.0);
        assert_eq!(sampler.sample(30.0), 20.0);
        // Window is full now; oldest (10.0) evicted.
        assert_eq!(sampler.sample(30.0), (20.0 + 30.0 + 30.0) / 3.0);
    }

    #[test]
    fn zero_or_one_sample_size_disables_averaging() {
        let mut sampler = Sampler::new(&config(SmoothingType::Avg, 0, 0.0));
        assert_eq!(sampler.sample(10.0), 10.0);
        assert_eq!(sampler.sample(20.0), 20.0);
    }

    #[test]
    fn reset_clears_the_window() {
        let mut sampler = Sampler::new(&config(SmoothingType::Avg, 3, 0.0));
        sampler.sample(10.0);
        sampler.sample(20.0);
        sampler.reset();
        assert_eq!(sampler.sample(5.0), 5.0);
    }
}
