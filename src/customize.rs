//! Injectable extension points for site-specific payload formats:
//! payload parsing, command formatting, and the optional
//! calibration/generic-side-effect hooks. Every method is fallible; the
//! core treats any error (or an `Ok(None)`) as "no value, continue".

use anyhow::Result;
use serde_json::Value;

use crate::config::CommandType;

#[cfg_attr(test, mockall::automock)]
pub trait CustomizeHooks: Send + Sync {
    /// Decode an ongoing power-meter reading. Negative means export.
    fn parse_power(&self, payload: &[u8]) -> Result<Option<f64>>;

    /// Decode an inverter-status update.
    fn parse_inverter_status(&self, payload: &[u8]) -> Result<Option<bool>>;

    /// Format a computed command for publication to `write_command`.
    fn format_command(&self, command: f64, kind: CommandType, min: f64, max: f64) -> Result<Option<String>>;

    /// Optional generic side effect for a computed command (e.g. a
    /// secondary HTTP push). The default is a no-op.
    fn on_command(&self, _command: f64, _kind: CommandType, _min: f64, _max: f64) -> Result<()> {
        Ok(())
    }

    /// Optional startup calibration probe; `Ok(None)` means "use the
    /// default calibration" (the calculator's own first-reading seed).
    fn calibrate(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Optional startup probe for the inverter's online status, used only
    /// when an `inverter_status` topic is *not* configured but the
    /// operator still wants a non-default initial value.
    fn initial_inverter_status(&self) -> Result<Option<bool>> {
        Ok(None)
    }
}

/// Default implementation covering the common case out of the box: a
/// Tasmota-style `em.power_total` JSON object for power readings, and a
/// case-insensitive `"1"`/`"true"` for inverter status.
///
/// Two probes are driven by plain HTTP GET when the opaque `customize`
/// config block names a URL for them: `calibrate_url` (a one-shot seed
/// for the limit calculator) and `initial_inverter_status_url` (a startup
/// probe for sites that don't wire up an `inverter_status` topic but still
/// want a non-default initial value). Both are best-effort: a missing URL,
/// unreachable host, or unparsable response all degrade to `Ok(None)`,
/// never an error that would abort startup.
pub struct DefaultCustomize {
    calibrate_url: Option<String>,
    initial_status_url: Option<String>,
    http: reqwest::blocking::Client,
}

impl DefaultCustomize {
    pub fn new(config: Value) -> Self {
        let calibrate_url = config.get("calibrate_url").and_then(Value::as_str).map(str::to_string);
        let initial_status_url = config.get("initial_inverter_status_url").and_then(Value::as_str).map(str::to_string);
        Self {
            calibrate_url,
            initial_status_url,
            http: reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("static client config"),
        }
    }

    fn fetch_number(&self, url: &str) -> Result<Option<f64>> {
        let body: Value = self.http.get(url).send()?.error_for_status()?.json()?;
        let value = body.as_f64().or_else(|| body.get("value").and_then(Value::as_f64));
        Ok(value)
    }

    fn fetch_bool(&self, url: &str) -> Result<Option<bool>> {
        let body: Value = self.http.get(url).send()?.error_for_status()?.json()?;
        let value = body.as_bool().or_else(|| body.get("value").and_then(Value::as_bool));
        Ok(value)
    }
}

impl CustomizeHooks for DefaultCustomize {
    fn parse_power(&self, payload: &[u8]) -> Result<Option<f64>> {
        let root: Value = serde_json::from_slice(payload)?;
        let value = root.get("em").and_then(|em| em.get("power_total")).and_then(Value::as_f64);
        Ok(value)
    }

    fn parse_inverter_status(&self, payload: &[u8]) -> Result<Option<bool>> {
        let text = std::str::from_utf8(payload)?.trim().to_lowercase();
        Ok(Some(text == "1" || text == "true"))
    }

    fn format_command(&self, command: f64, _kind: CommandType, _min: f64, _max: f64) -> Result<Option<String>> {
        Ok(Some(format!("{:.2}", command)))
    }

    fn calibrate(&self) -> Result<Option<f64>> {
        match &self.calibrate_url {
            Some(url) => self.fetch_number(url),
            None => Ok(None),
        }
    }

    fn initial_inverter_status(&self) -> Result<Option<bool>> {
        match &self.initial_status_url {
            Some(url) => self.fetch_bool(url),
            None => Ok(None),
        }
    }
}
