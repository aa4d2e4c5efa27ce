mod broker;
mod config;
mod controller;
mod customize;
mod domain;
mod telemetry;
mod wizard;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rumqttc::QoS;
use tracing::{info, warn};

use broker::{BrokerEvent, BrokerSession, MessageRouter, MetaSurface, RoutedMessage, TopicRole};
use config::AppConfig;
use controller::{Agent, BrokerAction};
use customize::DefaultCustomize;

/// Listens to a broker power-reading topic and publishes inverter power
/// limits based on a configured grid-power target.
#[derive(Parser, Debug)]
#[command(name = "solar-export-control")]
#[command(about = "Feedback-control agent that throttles a solar inverter to hold grid power near a target")]
struct Args {
    /// Path to the JSON config file.
    config: PathBuf,

    /// Raise logging to debug.
    #[arg(short, long)]
    verbose: bool,

    /// Additionally trace the broker session at packet-level detail.
    #[arg(long)]
    mqttdiag: bool,

    /// Print the config schema and exit, instead of running the agent.
    #[arg(long)]
    wizard: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.wizard {
        wizard::print_schema_help();
        return Ok(());
    }

    telemetry::init_tracing(args.verbose, args.mqttdiag);

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            if matches!(err.downcast_ref::<config::ConfigError>(), Some(config::ConfigError::NotFound(_))) {
                eprintln!("Run with --wizard to see the expected config schema.");
            }
            std::process::exit(1);
        }
    };

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: AppConfig) -> Result<()> {
    let meta = MetaSurface::new(&config.meta);
    let will_topic = meta.topic(TopicRole::StatusOnline);
    let router = MessageRouter::new(&config.mqtt.topics, &meta);
    let customize = Box::new(DefaultCustomize::new(config.customize.clone()));

    let mut agent = Agent::new(&config, customize);
    let mut session = BrokerSession::connect(&config.mqtt, &will_topic);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("solar-export-control starting");

    loop {
        tokio::select! {
            event = session.poll() => {
                let actions = match event {
                    BrokerEvent::ConnectSuccess => agent.on_connect_success(),
                    BrokerEvent::ConnectError(_) => {
                        agent.on_connect_error();
                        Vec::new()
                    }
                    BrokerEvent::Disconnected(reason) => {
                        warn!(reason, "broker session disconnected");
                        agent.on_disconnect();
                        Vec::new()
                    }
                    BrokerEvent::Publish { topic, payload } => {
                        match router.route(&topic, &payload, agent.customize_hooks()) {
                            Some(RoutedMessage::PowerReading(value)) => agent.on_power_reading(value),
                            Some(RoutedMessage::InverterStatus(value)) => agent.on_inverter_status(value),
                            Some(RoutedMessage::MetaEnabled(value)) => agent.on_meta_cmd_enabled(value),
                            None => Vec::new(),
                        }
                    }
                    BrokerEvent::Idle => Vec::new(),
                };
                execute(&mut session, actions).await;
            }
            _ = ticker.tick() => {
                let actions = agent.drain_due_actions();
                execute(&mut session, actions).await;
            }
            _ = telemetry::shutdown_signal() => {
                let _ = session.publish(&will_topic, "0", true).await;
                break;
            }
        }
    }

    Ok(())
}

async fn execute(session: &mut BrokerSession, actions: Vec<BrokerAction>) {
    for action in actions {
        let result = match &action {
            BrokerAction::Subscribe(topic) => session.subscribe(topic, QoS::AtMostOnce).await,
            BrokerAction::Unsubscribe(topic) => session.unsubscribe(topic).await,
            BrokerAction::Publish { topic, payload, retain } => session.publish(topic, payload, *retain).await,
        };
        if let Err(err) = result {
            warn!(%err, ?action, "broker action failed");
        }
    }
}
