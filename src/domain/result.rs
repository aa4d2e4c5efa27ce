use serde::Serialize;

/// One LimitCalculator step, carrying everything MetaSurface needs to
/// publish telemetry and, if present, an inverter command.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CalcResult {
    pub reading: f64,
    pub sample: f64,
    pub overshoot: f64,
    pub limit: f64,
    pub command: Option<f64>,

    pub is_calibration: bool,
    pub is_throttled: bool,
    pub is_hysteresis_suppressed: bool,
    pub is_retransmit: bool,

    /// Seconds since the previous emitted command, rounded to hundredths.
    pub elapsed: f64,
}

impl CalcResult {
    pub fn is_suppressed(&self) -> bool {
        self.command.is_none()
    }
}
