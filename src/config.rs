#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Distinguishes why config loading failed, so `main` can offer a more
/// specific hint (e.g. pointing a missing-file caller at `--wizard`)
/// without changing the exit code, which is 1 either way.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config: '{0}' does not exist")]
    NotFound(std::path::PathBuf),
    #[error("Failed to load config: '{0}'")]
    Invalid(std::path::PathBuf),
}

/// Top-level agent configuration, loaded from a single JSON file.
///
/// Unknown fields are ignored (no `deny_unknown_fields`): operators are
/// expected to carry forward fields from newer schema versions untouched.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub mqtt: BrokerConfig,

    #[validate(nested)]
    pub command: CommandConfig,

    #[validate(nested)]
    pub reading: ReadingConfig,

    #[validate(nested)]
    pub meta: MetaControlConfig,

    /// Opaque passthrough for the customize-hook implementation; the core
    /// never interprets this beyond handing it to `CustomizeHooks`.
    #[serde(default)]
    pub customize: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CommandType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum SmoothingType {
    None,
    Avg,
}

/// Drives LimitCalculator: target, clamp bounds, command mapping, throttle,
/// hysteresis and forced retransmit.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_command_config"))]
pub struct CommandConfig {
    /// Target grid power in watts. May be negative (export bias).
    pub target: i64,

    pub min_power: f64,
    pub max_power: f64,

    #[serde(rename = "type")]
    pub kind: CommandType,

    #[serde(default)]
    pub throttle: u64,

    #[serde(default)]
    pub hysteresis: f64,

    #[serde(default)]
    pub retransmit: u64,
}

fn validate_command_config(config: &CommandConfig) -> Result<(), validator::ValidationError> {
    if !(config.min_power < config.max_power) {
        return Err(validator::ValidationError::new("min_power must be less than max_power"));
    }
    if config.hysteresis < 0.0 {
        return Err(validator::ValidationError::new("hysteresis must be non-negative"));
    }
    Ok(())
}

/// Drives the Sampler: smoothing mode, window size, and a fixed offset
/// applied to every raw reading before smoothing.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReadingConfig {
    #[serde(default = "default_smoothing")]
    pub smoothing: SmoothingType,

    #[serde(default)]
    pub smoothing_sample_size: u32,

    #[serde(default)]
    pub offset: f64,
}

fn default_smoothing() -> SmoothingType {
    SmoothingType::None
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            smoothing: SmoothingType::None,
            smoothing_sample_size: 0,
            offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryFlags {
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub sample: bool,
    #[serde(default)]
    pub overshoot: bool,
    #[serde(default)]
    pub limit: bool,
    #[serde(default)]
    pub command: bool,
}

impl Default for TelemetryFlags {
    fn default() -> Self {
        Self {
            power: true,
            sample: true,
            overshoot: true,
            limit: true,
            command: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub id: i64,

    #[serde(default = "default_discovery_name")]
    pub name: String,
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_discovery_name() -> String {
    "Solar Export Control".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: default_discovery_prefix(),
            id: 0,
            name: default_discovery_name(),
        }
    }
}

/// Drives MetaSurface + the Lifecycle controller: the operator-facing
/// topic prefix, telemetry opt-ins and the Home Assistant discovery block.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_meta_control_config"))]
pub struct MetaControlConfig {
    pub prefix: String,

    #[serde(default)]
    pub reset_inverter_on_inactive: bool,

    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryFlags,

    #[serde(default)]
    #[validate(nested)]
    pub discovery: DiscoveryConfig,
}

fn validate_meta_control_config(config: &MetaControlConfig) -> Result<(), validator::ValidationError> {
    if config.prefix.is_empty() {
        return Err(validator::ValidationError::new("prefix must not be empty"));
    }
    if config.prefix.starts_with('/') {
        return Err(validator::ValidationError::new("prefix must not begin with '/'"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BrokerTopics {
    pub read_power: String,

    #[serde(default)]
    pub write_command: Option<String>,

    #[serde(default)]
    pub inverter_status: Option<String>,
}

/// `V5` is accepted by the schema (so a config file naming it fails
/// validation with a clear message instead of silently running as 3.1.1)
/// but not yet connectable: the client only links `rumqttc`'s 3.1.1 path.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V311,
    V5,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V311
    }
}

/// Broker connection parameters. See `crate::broker::session` for the
/// connection lifecycle this config drives.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_broker_config"))]
pub struct BrokerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    #[serde(default)]
    pub protocol: ProtocolVersion,

    #[validate(length(min = 1))]
    pub client_id: String,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    #[serde(default)]
    pub auth: Option<BrokerAuth>,

    #[serde(default)]
    pub retain: bool,

    #[validate(nested)]
    pub topics: BrokerTopics,
}

fn validate_broker_config(config: &BrokerConfig) -> Result<(), validator::ValidationError> {
    if config.protocol == ProtocolVersion::V5 {
        return Err(validator::ValidationError::new(
            "protocol v5 is not supported by the client this agent links (rumqttc's v5 client is a separate, incompatible API); use v311",
        ));
    }
    Ok(())
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    60
}

fn default_clean_session() -> bool {
    true
}

impl AppConfig {
    /// Load, and validate, the config file at `path`.
    ///
    /// Environment overrides use the `SEC__` prefix (e.g.
    /// `SEC__MQTT__HOST` -> `mqtt.host`), split on double underscore to
    /// address nested keys.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }

        let figment = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("SEC__").split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|err| anyhow::Error::new(err).context(ConfigError::Invalid(path.to_path_buf())))?;

        config
            .validate()
            .map_err(|err| anyhow::Error::new(err).context(ConfigError::Invalid(path.to_path_buf())))?;

        Ok(config)
    }
}
