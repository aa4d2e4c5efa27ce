use tracing::warn;

use crate::broker::{MetaSurface, TopicRole};
use crate::config::BrokerTopics;
use crate::customize::CustomizeHooks;

/// A decoded broker message, typed at the dispatch boundary so the
/// Lifecycle controller never sees a raw topic string or payload.
pub enum RoutedMessage {
    PowerReading(f64),
    InverterStatus(bool),
    MetaEnabled(bool),
}

/// Maps an incoming `(topic, payload)` pair to the handler it belongs to
/// and runs the matching `CustomizeHooks` decoder. A single exact-match
/// table replaces per-topic callback attributes; no wildcard matching is
/// attempted.
pub struct MessageRouter {
    read_power: String,
    inverter_status: Option<String>,
    cmd_enabled: String,
}

impl MessageRouter {
    pub fn new(topics: &BrokerTopics, meta: &MetaSurface) -> Self {
        Self {
            read_power: topics.read_power.clone(),
            inverter_status: topics.inverter_status.clone(),
            cmd_enabled: meta.topic(TopicRole::CmdEnabled),
        }
    }

    /// Decode and classify one incoming publish. Returns `None` for a
    /// topic the router doesn't own, a payload that decodes to "no
    /// value" (`Ok(None)`), or a decode failure (logged and dropped).
    pub fn route(&self, topic: &str, payload: &[u8], customize: &dyn CustomizeHooks) -> Option<RoutedMessage> {
        if topic == self.read_power {
            return match customize.parse_power(payload) {
                Ok(Some(value)) => Some(RoutedMessage::PowerReading(value)),
                Ok(None) => None,
                Err(err) => {
                    warn!(%err, topic, "parse_power failed, dropping message");
                    None
                }
            };
        }

        if self.inverter_status.as_deref() == Some(topic) {
            return match customize.parse_inverter_status(payload) {
                Ok(Some(value)) => Some(RoutedMessage::InverterStatus(value)),
                Ok(None) => None,
                Err(err) => {
                    warn!(%err, topic, "parse_inverter_status failed, dropping message");
                    None
                }
            };
        }

        if topic == self.cmd_enabled {
            return Some(RoutedMessage::MetaEnabled(crate::broker::meta::decode_bool(payload)));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customize::DefaultCustomize;
    use serde_json::Value;

    fn router(inverter_status: Option<&str>) -> MessageRouter {
        let topics = BrokerTopics {
            read_power: "tasmota/power/SENSOR".into(),
            write_command: Some("inverter/set/limit".into()),
            inverter_status: inverter_status.map(str::to_string),
        };
        let meta = MetaSurface::new(&crate::config::MetaControlConfig {
            prefix: "solar".into(),
            reset_inverter_on_inactive: false,
            telemetry: crate::config::TelemetryFlags::default(),
            discovery: crate::config::DiscoveryConfig::default(),
        });
        MessageRouter::new(&topics, &meta)
    }

    fn customize() -> DefaultCustomize {
        DefaultCustomize::new(Value::Null)
    }

    #[test]
    fn routes_power_reading() {
        let r = router(None);
        let payload = br#"{"em": {"power_total": 42.0}}"#;
        match r.route("tasmota/power/SENSOR", payload, &customize()) {
            Some(RoutedMessage::PowerReading(v)) => assert_eq!(v, 42.0),
            _ => panic!("expected a power reading"),
        }
    }

    #[test]
    fn routes_cmd_enabled() {
        let r = router(None);
        match r.route("solar/cmd/enabled", b"0", &customize()) {
            Some(RoutedMessage::MetaEnabled(v)) => assert!(!v),
            _ => panic!("expected a meta-enabled toggle"),
        }
    }

    #[test]
    fn routes_inverter_status_only_when_configured() {
        let r = router(Some("inverter/status"));
        match r.route("inverter/status", b"true", &customize()) {
            Some(RoutedMessage::InverterStatus(v)) => assert!(v),
            _ => panic!("expected an inverter status update"),
        }
    }

    #[test]
    fn unknown_topic_routes_to_none() {
        let r = router(None);
        assert!(r.route("unrelated/topic", b"1", &customize()).is_none());
    }

    #[test]
    fn malformed_power_payload_is_dropped_not_propagated() {
        let r = router(None);
        assert!(r.route("tasmota/power/SENSOR", b"not json", &customize()).is_none());
    }
}
