//! MQTT publish/subscribe driver.
//!
//! Grounded on `joynr::MosquittoPublisher` / `MosquittoSubscriber`
//! (cluster-controller/mqtt/MosquittoSubscriber.cpp): topic layout
//! `<channelId>/<priority>/<participantId>`, the connect-result taxonomy
//! (0 established, 1/2 fatal, 3 transient, else fatal), and the
//! restore-subscriptions contract on reconnect (primary topic plus every
//! additional topic registered since startup).
//!
//! The source's `restoreSubscriptions` busy-spins on `isChannelIdRegistered`
//! with a 25ms sleep while waiting for `registerChannelId` to run — this is
//! called out in the design notes as a bug to fix. Here that wait is a
//! single `tokio::sync::Notify::notified()` await, woken directly by
//! `register_channel_id`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnAck, ConnectReturnCode, Event, Incoming, QoS};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::domain_types::MqttQos;
use crate::message::Address;

/// Errors the MQTT driver's send/connect path can surface.
#[derive(Debug, Error)]
pub enum MqttDriverError {
    /// The broker rejected the connection with a non-recoverable code.
    #[error("fatal mqtt connect result: {0:?}")]
    FatalConnect(ConnectReturnCode),
    /// The address given to `send_message` was not an MQTT address.
    #[error("address is not an mqtt address")]
    NotAnMqttAddress,
    /// The underlying client reported an error.
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Whether a connect-return-code means "stop trying" or "retry."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Connection established; proceed to (re)subscribe.
    Established,
    /// Broker temporarily unavailable; keep retrying.
    Transient,
    /// Non-recoverable; stop reconnecting.
    Fatal,
}

/// Classifies a `CONNACK` return code per the design's connection-result taxonomy.
pub fn classify_connect_result(code: ConnectReturnCode) -> ConnectOutcome {
    match code {
        ConnectReturnCode::Success => ConnectOutcome::Established,
        ConnectReturnCode::RefusedProtocolVersion | ConnectReturnCode::BadClientId => {
            ConnectOutcome::Fatal
        }
        ConnectReturnCode::ServiceUnavailable => ConnectOutcome::Transient,
        _ => ConnectOutcome::Fatal,
    }
}

/// Builds the topic a message addressed to `to_participant_id` on
/// `channel_id` is published to: `<channelId>/<priority>/<toParticipantId>`.
pub fn outbound_topic(channel_id: &str, priority: &str, to_participant_id: &str) -> String {
    format!("{channel_id}/{priority}/{to_participant_id}")
}

/// Builds the wildcard topic the cluster controller subscribes to for its
/// own channel: `<ownChannelId>/<priority>/#`.
pub fn primary_subscription_topic(own_channel_id: &str, priority: &str) -> String {
    format!("{own_channel_id}/{priority}/#")
}

struct Registration {
    channel: std::sync::OnceLock<(String, String)>,
    registered: Notify,
}

/// MQTT publish/subscribe driver.
pub struct MqttDriver {
    client: AsyncClient,
    qos: MqttQos,
    retain: bool,
    reconnect_sleep: Duration,
    registration: Arc<Registration>,
    additional_topics: Arc<Mutex<HashSet<String>>>,
}

fn qos_to_rumqttc(qos: MqttQos) -> QoS {
    match qos {
        MqttQos::AtMostOnce => QoS::AtMostOnce,
        MqttQos::AtLeastOnce => QoS::AtLeastOnce,
        MqttQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

impl MqttDriver {
    /// Creates a driver connected to `broker_url`, initially unregistered
    /// (no channel id known yet — see [`Self::register_channel_id`]).
    pub fn new(client: AsyncClient, qos: MqttQos, retain: bool, reconnect_sleep: Duration) -> Self {
        Self {
            client,
            qos,
            retain,
            reconnect_sleep,
            registration: Arc::new(Registration {
                channel: std::sync::OnceLock::new(),
                registered: Notify::new(),
            }),
            additional_topics: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Records this node's own channel id and priority label, and wakes any
    /// task blocked in [`Self::restore_subscriptions`] waiting for it. Only
    /// the first call takes effect, matching a one-time startup registration.
    pub fn register_channel_id(&self, channel_id: String, priority: String) {
        let _ = self.registration.channel.set((channel_id, priority));
        self.registration.registered.notify_waiters();
    }

    /// Adds `topic` to the set of additional subscriptions and subscribes
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client rejects the subscribe call.
    pub async fn subscribe_to_topic(&self, topic: impl Into<String>) -> Result<(), MqttDriverError> {
        let topic = topic.into();
        self.client.subscribe(&topic, qos_to_rumqttc(self.qos)).await?;
        self.additional_topics.lock().await.insert(topic);
        Ok(())
    }

    /// Removes `topic` from the additional-topics set and unsubscribes.
    /// Unsubscribing an unknown topic is a no-op, matching the source's
    /// "unsubscribe on unknown topic is a no-op" contract.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client rejects the unsubscribe call.
    pub async fn unsubscribe_from_topic(&self, topic: &str) -> Result<(), MqttDriverError> {
        let mut topics = self.additional_topics.lock().await;
        if !topics.remove(topic) {
            return Ok(());
        }
        drop(topics);
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    /// Waits (via condition variable, not a polling sleep) until
    /// [`Self::register_channel_id`] has run, then re-issues the primary
    /// subscription plus every additional topic registered so far. Called on
    /// every reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if any subscribe call fails.
    pub async fn restore_subscriptions(&self) -> Result<(), MqttDriverError> {
        while self.registration.channel.get().is_none() {
            self.registration.registered.notified().await;
        }
        let (channel_id, priority) = self
            .registration
            .channel
            .get()
            .expect("just confirmed present above");

        let primary = primary_subscription_topic(channel_id, priority);
        self.client.subscribe(&primary, qos_to_rumqttc(self.qos)).await?;

        let topics: Vec<String> = self.additional_topics.lock().await.iter().cloned().collect();
        for topic in topics {
            self.client.subscribe(&topic, qos_to_rumqttc(self.qos)).await?;
        }
        Ok(())
    }

    /// Publishes `bytes` to the topic addressed by `destination`, dropping
    /// silently once `decay_time` passes (matching the HTTP driver's
    /// contract). On a disconnect the underlying client queues the publish
    /// and this call still returns promptly; retries across a disconnect
    /// window are handled by `rumqttc`'s internal queue plus the event loop
    /// reconnect/backoff below.
    ///
    /// # Errors
    ///
    /// Returns [`MqttDriverError::NotAnMqttAddress`] if `destination` is not
    /// an MQTT address, or a client error if the publish call itself fails.
    pub async fn send_message(
        &self,
        destination: &Address,
        bytes: Vec<u8>,
        decay_time: Instant,
    ) -> Result<(), MqttDriverError> {
        let topic = match destination {
            Address::Mqtt { topic, .. } => topic.clone(),
            _ => return Err(MqttDriverError::NotAnMqttAddress),
        };
        if Instant::now() > decay_time {
            return Ok(());
        }
        self.client
            .publish(topic, qos_to_rumqttc(self.qos), self.retain, bytes)
            .await?;
        Ok(())
    }

    /// Drives the event loop, restoring subscriptions on every successful
    /// (re)connect and sleeping `reconnect_sleep` between connection
    /// attempts while the broker is only transiently unavailable.
    pub async fn run_event_loop(self: Arc<Self>, mut event_loop: rumqttc::EventLoop, sink: Arc<dyn MqttInboundSink>) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ConnAck { code, .. }))) => {
                    match classify_connect_result(code) {
                        ConnectOutcome::Established => {
                            info!("mqtt connected, restoring subscriptions");
                            if let Err(error) = self.restore_subscriptions().await {
                                error!(%error, "failed to restore subscriptions");
                            }
                        }
                        ConnectOutcome::Transient => {
                            warn!("broker unavailable, retrying");
                            tokio::time::sleep(self.reconnect_sleep).await;
                        }
                        ConnectOutcome::Fatal => {
                            error!(?code, "fatal mqtt connect result, stopping reconnection");
                            return;
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    sink.on_inbound_publish(&publish.topic, publish.payload.to_vec()).await;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "mqtt event loop error, sleeping before retry");
                    tokio::time::sleep(self.reconnect_sleep).await;
                }
            }
        }
    }
}

/// Receives inbound publishes from [`MqttDriver::run_event_loop`].
#[async_trait]
pub trait MqttInboundSink: Send + Sync {
    /// Delivers one inbound publish's payload and the topic it arrived on.
    async fn on_inbound_publish(&self, topic: &str, payload: Vec<u8>);
}
