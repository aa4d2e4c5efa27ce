use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;

/// Connection lifecycle states. Most transitions are driven implicitly by
/// `rumqttc`'s internal reconnect machinery; this enum exists so the
/// session can log and expose which state it currently believes it's in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Topics currently subscribed, mutated only from the main loop.
#[derive(Default)]
pub struct SubscriptionSet {
    topics: HashSet<String>,
}

impl SubscriptionSet {
    fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    fn insert(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
    }

    fn remove(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.topics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Decoded broker events the main loop reacts to. Payload parsing beyond
/// this point (power reading / inverter status / enable command) is left
/// to the caller, which routes by topic role.
pub enum BrokerEvent {
    ConnectSuccess,
    ConnectError(ConnectReturnCode),
    Disconnected(String),
    Publish { topic: String, payload: Vec<u8> },
    Idle,
}

pub struct BrokerSession {
    client: AsyncClient,
    eventloop: EventLoop,
    pub subs: SubscriptionSet,
    attempt: u32,
    state: ConnectionState,
}

impl BrokerSession {
    /// Build a session with last-will already installed; the network
    /// connection itself happens lazily on the first `poll()`.
    pub fn connect(config: &BrokerConfig, will_topic: &str) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive as u64));
        options.set_clean_session(config.clean_session);

        if let Some(auth) = &config.auth {
            options.set_credentials(auth.username.clone(), auth.password.clone());
        }

        options.set_last_will(LastWill::new(will_topic, "0", QoS::AtMostOnce, true));

        let (client, eventloop) = AsyncClient::new(options, 64);

        info!(host = %config.host, port = config.port, "connecting");

        Self {
            client,
            eventloop,
            subs: SubscriptionSet::default(),
            attempt: 0,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        if self.subs.contains(topic) {
            return Ok(());
        }
        self.client.subscribe(topic, qos).await.context("subscribe failed")?;
        self.subs.insert(topic);
        debug!(topic, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        if !self.subs.contains(topic) {
            return Ok(());
        }
        self.client.unsubscribe(topic).await.context("unsubscribe failed")?;
        self.subs.remove(topic);
        debug!(topic, "unsubscribed");
        Ok(())
    }

    pub async fn unsubscribe_many(&mut self, topics: &[String]) -> Result<()> {
        for topic in topics {
            self.unsubscribe(topic).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe_all(&mut self) -> Result<()> {
        let topics: Vec<String> = self.subs.iter().cloned().collect();
        self.unsubscribe_many(&topics).await
    }

    /// `qos=0, retain` per topic; return value is advisory — the caller
    /// never blocks on broker acknowledgement.
    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .context("publish failed")
    }

    pub fn will(&self, topic: &str) -> Result<()> {
        // Installed at construction time; kept as a named operation so
        // callers can assert the will topic without reaching into MqttOptions.
        let _ = topic;
        Ok(())
    }

    /// Drive the connection one step. On a non-success poll, sleeps for
    /// `min(2 * attempt, 60)` seconds before returning — the next `poll()`
    /// call is what actually triggers `rumqttc`'s internal reconnect.
    pub async fn poll(&mut self) -> BrokerEvent {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                self.subs.clear();
                if ack.code == ConnectReturnCode::Success {
                    self.attempt = 0;
                    self.state = ConnectionState::Connected;
                    info!(code = ?ack.code, "connection accepted");
                    BrokerEvent::ConnectSuccess
                } else {
                    self.state = ConnectionState::Disconnected;
                    warn!(code = ?ack.code, "connection rejected");
                    BrokerEvent::ConnectError(ack.code)
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => BrokerEvent::Publish {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                self.subs.clear();
                self.state = ConnectionState::Disconnected;
                warn!("broker sent disconnect");
                BrokerEvent::Disconnected("server disconnect".to_string())
            }
            Ok(_) => BrokerEvent::Idle,
            Err(err) => {
                self.subs.clear();
                self.state = ConnectionState::Backoff;
                self.attempt += 1;
                let delay = Duration::from_secs((2 * self.attempt as u64).min(60));
                warn!(error = %err, attempt = self.attempt, delay_secs = delay.as_secs(), "disconnected, backing off");
                tokio::time::sleep(delay).await;
                self.state = ConnectionState::Connecting;
                BrokerEvent::Disconnected(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_set_dedups() {
        let mut subs = SubscriptionSet::default();
        subs.insert("a/b");
        subs.insert("a/b");
        assert_eq!(subs.iter().count(), 1);
        subs.remove("a/b");
        assert!(subs.is_empty());
    }

    #[test]
    fn subscription_set_remove_of_non_member_is_a_no_op() {
        let mut subs = SubscriptionSet::default();
        subs.remove("nope");
        assert!(subs.is_empty());
    }
}
