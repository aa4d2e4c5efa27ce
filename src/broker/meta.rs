use crate::config::{DiscoveryConfig, MetaControlConfig, TelemetryFlags};
use crate::domain::CalcResult;

/// Canonical topic roles under the meta prefix. Kept as an enum (rather
/// than ad-hoc string joins scattered through the lifecycle controller)
/// so typed dispatch in the broker router has something concrete to
/// match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    CmdEnabled,
    StatusOnline,
    StatusEnabled,
    StatusInverter,
    StatusActive,
    TelePower,
    TeleSample,
    TeleOvershoot,
    TeleLimit,
    TeleCommand,
}

impl TopicRole {
    fn path(self) -> &'static str {
        match self {
            TopicRole::CmdEnabled => "cmd/enabled",
            TopicRole::StatusOnline => "status/online",
            TopicRole::StatusEnabled => "status/enabled",
            TopicRole::StatusInverter => "status/inverter",
            TopicRole::StatusActive => "status/active",
            TopicRole::TelePower => "tele/power",
            TopicRole::TeleSample => "tele/sample",
            TopicRole::TeleOvershoot => "tele/overshoot",
            TopicRole::TeleLimit => "tele/limit",
            TopicRole::TeleCommand => "tele/command",
        }
    }
}

/// Derives topic names and payload encodings under a configurable
/// prefix, and builds the Home Assistant discovery catalogue.
pub struct MetaSurface {
    prefix: String,
    telemetry: TelemetryFlags,
    discovery: DiscoveryConfig,
}

/// `true`/`false` -> `"1"`/`"0"`.
pub fn encode_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Accepts `"1"`/`"true"` (case-insensitive) as true, anything else as false.
pub fn decode_bool(payload: &[u8]) -> bool {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim().to_lowercase();
    text == "1" || text == "true"
}

pub fn encode_decimal(value: f64) -> String {
    format!("{:.2}", value)
}

fn join(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl MetaSurface {
    pub fn new(config: &MetaControlConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            telemetry: config.telemetry.clone(),
            discovery: config.discovery.clone(),
        }
    }

    pub fn topic(&self, role: TopicRole) -> String {
        join(&[&self.prefix, role.path()])
    }

    pub fn retained(&self, role: TopicRole) -> bool {
        matches!(role, TopicRole::StatusOnline)
    }

    /// Which `tele/*` publications are currently enabled, in result order.
    pub fn telemetry_entries(&self, result: &CalcResult) -> Vec<(TopicRole, String)> {
        let mut entries = Vec::new();
        if self.telemetry.power {
            entries.push((TopicRole::TelePower, encode_decimal(result.reading)));
        }
        if self.telemetry.sample {
            entries.push((TopicRole::TeleSample, encode_decimal(result.sample)));
        }
        if self.telemetry.overshoot {
            entries.push((TopicRole::TeleOvershoot, encode_decimal(result.overshoot)));
        }
        if self.telemetry.limit {
            entries.push((TopicRole::TeleLimit, encode_decimal(result.limit)));
        }
        entries
    }

    pub fn command_telemetry_enabled(&self) -> bool {
        self.telemetry.command
    }

    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    /// The fixed discovery catalogue: one sensor per enabled telemetry
    /// stream, one binary sensor per status bit, and the enable switch.
    /// Each tuple is `(discovery_topic, payload)`; an empty payload
    /// removes a previously published entity.
    pub fn discovery_entries(&self) -> Vec<(String, String)> {
        if !self.discovery.enabled {
            return Vec::new();
        }

        let id = self.discovery.id;
        let device = serde_json::json!({
            "name": self.discovery.name,
            "ids": id,
            "mf": "Solar Export Control",
        });
        let online = self.topic(TopicRole::StatusOnline);
        let active = self.topic(TopicRole::StatusActive);

        let mut entries = Vec::new();

        let sensors = [
            (TopicRole::TelePower, "power", self.telemetry.power, "W"),
            (TopicRole::TeleSample, "sample", self.telemetry.sample, "W"),
            (TopicRole::TeleOvershoot, "overshoot", self.telemetry.overshoot, "W"),
            (TopicRole::TeleLimit, "limit", self.telemetry.limit, "W"),
            (TopicRole::TeleCommand, "command", self.telemetry.command, ""),
        ];

        for (role, name, enabled, unit) in sensors {
            let unique_id = format!("sec_{id}_{name}");
            let discovery_topic = format!("{}/sensor/{}/config", self.discovery.prefix, unique_id);
            let payload = if enabled {
                let mut config = serde_json::json!({
                    "name": name,
                    "unique_id": unique_id,
                    "state_topic": self.topic(role),
                    "device": device,
                    "availability_topic": online,
                    "availability": [
                        {"topic": online},
                        {"topic": active},
                    ],
                    "availability_mode": "all",
                });
                if !unit.is_empty() {
                    config["unit_of_measurement"] = serde_json::Value::String(unit.to_string());
                }
                config.to_string()
            } else {
                String::new()
            };
            entries.push((discovery_topic, payload));
        }

        let binary_sensors = [(TopicRole::StatusInverter, "inverter"), (TopicRole::StatusActive, "active")];

        for (role, name) in binary_sensors {
            let unique_id = format!("sec_{id}_{name}");
            let discovery_topic = format!("{}/binary_sensor/{}/config", self.discovery.prefix, unique_id);
            let payload = serde_json::json!({
                "name": name,
                "unique_id": unique_id,
                "state_topic": self.topic(role),
                "payload_on": "1",
                "payload_off": "0",
                "device": device,
                "availability_topic": online,
            })
            .to_string();
            entries.push((discovery_topic, payload));
        }

        let switch_id = format!("sec_{id}_enable");
        let switch_topic = format!("{}/switch/{}/config", self.discovery.prefix, switch_id);
        let switch_payload = serde_json::json!({
            "name": "enabled",
            "unique_id": switch_id,
            "state_topic": self.topic(TopicRole::StatusEnabled),
            "command_topic": self.topic(TopicRole::CmdEnabled),
            "payload_on": "1",
            "payload_off": "0",
            "device": device,
            "availability_topic": online,
        })
        .to_string();
        entries.push((switch_topic, switch_payload));

        entries
    }
}
