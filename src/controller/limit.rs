use std::time::Instant;

use crate::config::{CommandConfig, CommandType, ReadingConfig};
use crate::controller::sampler::Sampler;
use crate::domain::CalcResult;

/// Injected time source so LimitCalculator's throttle/retransmit logic is
/// deterministically testable against literal elapsed-time scenarios.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CalcState {
    last_command_time: Option<Instant>,
    last_limit_value: f64,
    is_calibrated: bool,
}

/// Smoothing -> overshoot -> limit -> command pipeline. Pure and
/// deterministic apart from the injected clock; never performs I/O.
pub struct LimitCalculator {
    config: CommandConfig,
    sampler: Sampler,
    state: CalcState,
    clock: Box<dyn Clock>,
}

impl LimitCalculator {
    pub fn new(command: CommandConfig, reading: &ReadingConfig) -> Self {
        Self::with_clock(command, reading, Box::new(SystemClock))
    }

    pub fn with_clock(command: CommandConfig, reading: &ReadingConfig, clock: Box<dyn Clock>) -> Self {
        let min_power = command.min_power;
        Self {
            config: command,
            sampler: Sampler::new(reading),
            state: CalcState {
                last_command_time: None,
                last_limit_value: min_power,
                is_calibrated: false,
            },
            clock,
        }
    }

    pub fn add_reading(&mut self, raw: f64) -> CalcResult {
        let now = self.clock.now();
        let sample = self.sampler.sample(raw);

        let elapsed = match self.state.last_command_time {
            Some(last) => round2(now.duration_since(last).as_secs_f64()),
            None => f64::INFINITY,
        };

        let overshoot = sample - self.config.target as f64;
        let limit_raw = self.state.last_limit_value + overshoot;
        let limit = limit_raw.clamp(self.config.min_power, self.config.max_power);

        let is_calibration = !self.state.is_calibrated;

        let mut is_throttled = false;
        let mut is_retransmit = false;
        let mut is_hysteresis_suppressed = false;

        if !is_calibration {
            if elapsed < self.config.throttle as f64 {
                is_throttled = true;
            } else if self.config.retransmit > 0 && elapsed >= self.config.retransmit as f64 {
                is_retransmit = true;
            } else {
                let snap_to_max = limit == self.config.max_power && self.state.last_limit_value != self.config.max_power;
                if !snap_to_max && (self.state.last_limit_value - limit).abs() < self.config.hysteresis {
                    is_hysteresis_suppressed = true;
                }
            }
        }

        let command = if is_throttled || is_hysteresis_suppressed {
            None
        } else {
            let command = self.map_command(limit);
            self.state.last_command_time = Some(now);
            self.state.last_limit_value = limit;
            self.state.is_calibrated = true;
            Some(command)
        };

        CalcResult {
            reading: raw,
            sample,
            overshoot,
            limit,
            command,
            is_calibration,
            is_throttled,
            is_hysteresis_suppressed,
            is_retransmit,
            elapsed,
        }
    }

    pub fn get_command_min(&self) -> f64 {
        self.map_command(self.config.min_power)
    }

    pub fn get_command_max(&self) -> f64 {
        self.map_command(self.config.max_power)
    }

    pub fn reset(&mut self) {
        self.sampler.reset();
        self.state.last_command_time = None;
        self.state.last_limit_value = self.config.min_power;
        self.state.is_calibrated = false;
    }

    fn map_command(&self, limit: f64) -> f64 {
        match self.config.kind {
            CommandType::Absolute => limit,
            CommandType::Relative => (limit / self.config.max_power) * 100.0,
        }
    }
}

fn round2(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::Clock;
    use std::cell::Cell;
    use std::time::{Duration, Instant};

    /// A clock that only moves forward when told to, for literal
    /// `t = 0s / 1s / 11s / ...` scenario tests.
    pub struct FakeClock {
        now: Cell<Instant>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self { now: Cell::new(Instant::now()) }
        }

        pub fn advance(&self, seconds: u64) {
            self.now.set(self.now.get() + Duration::from_secs(seconds));
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    impl Clock for std::rc::Rc<FakeClock> {
        fn now(&self) -> Instant {
            Clock::now(self.as_ref())
        }
    }

    unsafe impl Send for FakeClock {}
    unsafe impl Sync for FakeClock {}
}
