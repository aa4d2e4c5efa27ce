use std::time::Duration;

use tracing::warn;

use crate::broker::{MetaSurface, TopicRole};
use crate::config::{AppConfig, BrokerTopics, CommandConfig};
use crate::controller::limit::LimitCalculator;
use crate::controller::scheduler::{Action, Scheduler};
use crate::customize::CustomizeHooks;

/// One broker operation the main loop must carry out on the agent's
/// behalf. The Agent never touches the network directly, which is what
/// keeps its transition logic synchronous and unit-testable.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerAction {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: String, retain: bool },
}

fn publish(topic: String, payload: impl Into<String>, retain: bool) -> BrokerAction {
    BrokerAction::Publish {
        topic,
        payload: payload.into(),
        retain,
    }
}

#[derive(Debug, Clone, Copy)]
struct LifecycleState {
    setup_mode: bool,
    meta_status: bool,
    inverter_status: bool,
    published_discovery: bool,
}

/// Wires Sampler + LimitCalculator to the broker surface and owns the
/// three-bit activity gate. All methods are synchronous; I/O is
/// expressed as returned `BrokerAction`s for the caller to execute.
pub struct Agent {
    limit: LimitCalculator,
    scheduler: Scheduler,
    meta: MetaSurface,
    customize: Box<dyn CustomizeHooks>,
    command: CommandConfig,
    topics: BrokerTopics,
    retain_commands: bool,
    reset_inverter_on_inactive: bool,
    state: LifecycleState,
}

impl Agent {
    pub fn new(config: &AppConfig, customize: Box<dyn CustomizeHooks>) -> Self {
        let inverter_status = match &config.mqtt.topics.inverter_status {
            None => true,
            Some(_) => match customize.initial_inverter_status() {
                Ok(Some(value)) => value,
                Ok(None) => false,
                Err(err) => {
                    warn!(%err, "initial inverter status probe failed");
                    false
                }
            },
        };

        let limit = LimitCalculator::new(config.command.clone(), &config.reading);

        Self {
            limit,
            scheduler: Scheduler::new(),
            meta: MetaSurface::new(&config.meta),
            customize,
            command: config.command.clone(),
            topics: config.mqtt.topics.clone(),
            retain_commands: config.mqtt.retain,
            reset_inverter_on_inactive: config.meta.reset_inverter_on_inactive,
            state: LifecycleState {
                setup_mode: true,
                meta_status: true,
                inverter_status,
                published_discovery: false,
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.meta_status && self.state.inverter_status && !self.state.setup_mode
    }

    pub fn setup_mode(&self) -> bool {
        self.state.setup_mode
    }

    /// Exposes the injected hooks so the main loop's `MessageRouter` can
    /// decode broker payloads with the same implementation the Agent
    /// uses for command formatting.
    pub fn customize_hooks(&self) -> &dyn CustomizeHooks {
        self.customize.as_ref()
    }

    /// Drain any deferred actions (currently only `stop_setup_mode`)
    /// whose delay has elapsed. Call this once per main-loop iteration.
    pub fn drain_due_actions(&mut self) -> Vec<BrokerAction> {
        let due = self.scheduler.drain_due();
        let mut actions = Vec::new();
        for action in due {
            match action {
                Action::StopSetupMode => actions.extend(self.stop_setup_mode()),
            }
        }
        actions
    }

    pub fn on_connect_success(&mut self) -> Vec<BrokerAction> {
        self.state.setup_mode = true;

        let mut actions = vec![BrokerAction::Subscribe(self.meta.topic(TopicRole::CmdEnabled))];
        if let Some(topic) = &self.topics.inverter_status {
            actions.push(BrokerAction::Subscribe(topic.clone()));
        }
        actions.push(publish(self.meta.topic(TopicRole::StatusOnline), "1", true));

        self.scheduler.schedule(Duration::from_secs(10), Action::StopSetupMode);
        actions
    }

    pub fn on_connect_error(&mut self) {
        self.state.meta_status = false;
        self.state.inverter_status = false;
        self.state.setup_mode = false;
    }

    /// An unexpected disconnect cancels the (at most one) pending
    /// `stop_setup_mode` callback; `BrokerSession` clears its own
    /// `SubscriptionSet`, and the next `on_connect_success` re-establishes
    /// both from scratch.
    pub fn on_disconnect(&mut self) {
        self.scheduler.clear();
    }

    fn stop_setup_mode(&mut self) -> Vec<BrokerAction> {
        self.state.setup_mode = false;
        self.set_status(None, None, true)
    }

    pub fn on_meta_cmd_enabled(&mut self, enabled: bool) -> Vec<BrokerAction> {
        self.set_status(Some(enabled), None, false)
    }

    pub fn on_inverter_status(&mut self, online: bool) -> Vec<BrokerAction> {
        self.set_status(None, Some(online), false)
    }

    pub fn on_power_reading(&mut self, raw: f64) -> Vec<BrokerAction> {
        if !self.is_active() {
            return Vec::new();
        }

        let result = self.limit.add_reading(raw);
        let mut actions = Vec::new();

        for (role, payload) in self.meta.telemetry_entries(&result) {
            actions.push(publish(self.meta.topic(role), payload, false));
        }

        if let Some(command) = result.command {
            actions.extend(self.command_actions(command));
        }

        actions
    }

    fn set_status(&mut self, meta: Option<bool>, inverter: Option<bool>, force: bool) -> Vec<BrokerAction> {
        let meta = meta.unwrap_or(self.state.meta_status);
        let inverter = inverter.unwrap_or(self.state.inverter_status);

        if !force && meta == self.state.meta_status && inverter == self.state.inverter_status {
            return Vec::new();
        }

        self.state.meta_status = meta;
        self.state.inverter_status = inverter;

        if self.state.setup_mode {
            return Vec::new();
        }

        let active = meta && inverter;
        let mut actions = vec![
            publish(self.meta.topic(TopicRole::StatusEnabled), if meta { "1" } else { "0" }, false),
            publish(self.meta.topic(TopicRole::StatusInverter), if inverter { "1" } else { "0" }, false),
            publish(self.meta.topic(TopicRole::StatusActive), if active { "1" } else { "0" }, false),
        ];

        if active {
            if !force {
                self.limit.reset();
            }
            actions.push(BrokerAction::Subscribe(self.topics.read_power.clone()));
            if !self.state.published_discovery {
                for (topic, payload) in self.meta.discovery_entries() {
                    actions.push(publish(topic, payload, true));
                }
                self.state.published_discovery = true;
            }
        } else {
            actions.push(BrokerAction::Unsubscribe(self.topics.read_power.clone()));
            if !meta && !force && self.reset_inverter_on_inactive {
                if let Some(action) = self.final_command_action() {
                    actions.push(action);
                }
            }
        }

        actions
    }

    fn command_actions(&self, limit_value: f64) -> Vec<BrokerAction> {
        let mut actions = Vec::new();

        match self.customize.format_command(limit_value, self.command.kind, self.command.min_power, self.command.max_power) {
            Ok(Some(payload)) => {
                if let Some(topic) = &self.topics.write_command {
                    actions.push(publish(topic.clone(), payload.clone(), self.retain_commands));
                }
                if self.meta.command_telemetry_enabled() {
                    actions.push(publish(self.meta.topic(TopicRole::TeleCommand), payload, false));
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "format_command failed"),
        }

        if let Err(err) = self.customize.on_command(limit_value, self.command.kind, self.command.min_power, self.command.max_power) {
            warn!(%err, "on_command hook failed");
        }

        actions
    }

    fn final_command_action(&self) -> Option<BrokerAction> {
        let topic = self.topics.write_command.as_ref()?;
        let limit_value = self.limit.get_command_max();

        match self.customize.format_command(limit_value, self.command.kind, self.command.min_power, self.command.max_power) {
            Ok(Some(payload)) => Some(publish(topic.clone(), payload, self.retain_commands)),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "format_command failed for final inactive command");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, CommandType, DiscoveryConfig, MetaControlConfig, ProtocolVersion, ReadingConfig, SmoothingType, TelemetryFlags};
    use crate::customize::DefaultCustomize;
    use serde_json::Value;

    fn config(reset_inverter_on_inactive: bool, inverter_status_topic: Option<&str>) -> AppConfig {
        AppConfig {
            mqtt: BrokerConfig {
                host: "localhost".into(),
                port: 1883,
                keepalive: 60,
                protocol: ProtocolVersion::V311,
                client_id: "sec-agent".into(),
                clean_session: true,
                auth: None,
                retain: false,
                topics: BrokerTopics {
                    read_power: "tasmota/power/SENSOR".into(),
                    write_command: Some("inverter/set/limit".into()),
                    inverter_status: inverter_status_topic.map(|s| s.to_string()),
                },
            },
            command: CommandConfig {
                target: 0,
                min_power: 0.0,
                max_power: 1000.0,
                kind: CommandType::Absolute,
                throttle: 0,
                hysteresis: 0.0,
                retransmit: 0,
            },
            reading: ReadingConfig {
                smoothing: SmoothingType::None,
                smoothing_sample_size: 1,
                offset: 0.0,
            },
            meta: MetaControlConfig {
                prefix: "solar".into(),
                reset_inverter_on_inactive,
                telemetry: TelemetryFlags::default(),
                discovery: DiscoveryConfig::default(),
            },
            customize: Value::Null,
        }
    }

    fn agent(reset_inverter_on_inactive: bool, inverter_status_topic: Option<&str>) -> Agent {
        let cfg = config(reset_inverter_on_inactive, inverter_status_topic);
        Agent::new(&cfg, Box::new(DefaultCustomize::new(cfg.customize.clone())))
    }

    #[test]
    fn defaults_to_active_once_setup_mode_clears_without_inverter_topic() {
        let mut agent = agent(false, None);
        assert!(agent.setup_mode());
        let actions = agent.on_connect_success();
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Subscribe(t) if t == "solar/cmd/enabled")));

        let actions = agent.stop_setup_mode();
        assert!(!agent.setup_mode());
        assert!(agent.is_active());
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Subscribe(t) if t == "tasmota/power/SENSOR")));
    }

    #[test]
    fn power_reading_is_dropped_while_inactive() {
        let mut agent = agent(false, None);
        assert!(agent.on_power_reading(100.0).is_empty());
    }

    #[test]
    fn power_reading_produces_command_once_active() {
        let mut agent = agent(false, None);
        agent.on_connect_success();
        agent.stop_setup_mode();
        let actions = agent.on_power_reading(100.0);
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic == "inverter/set/limit")));
    }

    #[test]
    fn disabling_publishes_final_command_when_configured() {
        let mut agent = agent(true, None);
        agent.on_connect_success();
        agent.stop_setup_mode();
        let actions = agent.on_meta_cmd_enabled(false);
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Unsubscribe(t) if t == "tasmota/power/SENSOR")));
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, payload, .. } if topic == "inverter/set/limit" && payload == "1000.00")));
    }

    #[test]
    fn forced_reconciliation_never_publishes_final_command() {
        let mut agent = agent(true, None);
        agent.on_connect_success();
        let actions = agent.stop_setup_mode();
        // still active (meta+inverter true), no final command expected regardless
        assert!(!actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic == "inverter/set/limit")));
    }

    #[test]
    fn discovery_publishes_only_once() {
        let mut cfg = config(false, None);
        cfg.meta.discovery.enabled = true;
        let mut agent = Agent::new(&cfg, Box::new(DefaultCustomize::new(cfg.customize.clone())));
        agent.on_connect_success();
        let first = agent.stop_setup_mode();
        let discovery_count_first = first.iter().filter(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic.contains("homeassistant"))).count();
        assert!(discovery_count_first > 0);

        agent.on_meta_cmd_enabled(false);
        let second = agent.on_meta_cmd_enabled(true);
        let discovery_count_second = second.iter().filter(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic.contains("homeassistant"))).count();
        assert_eq!(discovery_count_second, 0);
    }

    #[test]
    fn disconnect_cancels_pending_setup_mode_timer() {
        let mut agent = agent(false, None);
        agent.on_connect_success();
        assert!(!agent.scheduler.is_empty());
        agent.on_disconnect();
        assert!(agent.scheduler.is_empty());
    }

    #[test]
    fn connect_error_forces_inactive() {
        let mut agent = agent(false, None);
        agent.on_connect_success();
        agent.stop_setup_mode();
        assert!(agent.is_active());
        agent.on_connect_error();
        assert!(!agent.is_active());
        assert!(!agent.setup_mode());
    }

    #[test]
    fn format_command_failure_is_logged_and_skips_publish_and_mirror() {
        use crate::customize::MockCustomizeHooks;

        let mut mock = MockCustomizeHooks::new();
        mock.expect_format_command().returning(|_, _, _, _| Err(anyhow::anyhow!("boom")));
        mock.expect_on_command().returning(|_, _, _, _| Ok(()));

        let cfg = config(false, None);
        let mut agent = Agent::new(&cfg, Box::new(mock));
        agent.on_connect_success();
        agent.stop_setup_mode();

        let actions = agent.on_power_reading(100.0);
        assert!(!actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic == "inverter/set/limit")));
        assert!(!actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic.ends_with("tele/command"))));
    }

    #[test]
    fn on_command_side_effect_failure_does_not_suppress_the_publish() {
        use crate::customize::MockCustomizeHooks;

        let mut mock = MockCustomizeHooks::new();
        mock.expect_format_command().returning(|cmd, _, _, _| Ok(Some(format!("{cmd:.2}"))));
        mock.expect_on_command().returning(|_, _, _, _| Err(anyhow::anyhow!("side effect unavailable")));

        let cfg = config(false, None);
        let mut agent = Agent::new(&cfg, Box::new(mock));
        agent.on_connect_success();
        agent.stop_setup_mode();

        let actions = agent.on_power_reading(100.0);
        assert!(actions.iter().any(|a| matches!(a, BrokerAction::Publish { topic, .. } if topic == "inverter/set/limit")));
    }
}
