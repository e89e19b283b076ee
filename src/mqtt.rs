//! MQTT uplink subscription
//!
//! LoRaWAN network servers publish every uplink as JSON on MQTT, using the
//! same envelope the HTTP webhook receives.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    config::MqttConfig,
    database::SpotStore,
    errors::TrackerError,
    uplink::{self, UplinkEnvelope},
};

/// MQTT client for receiving sensor uplinks
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
    tx: mpsc::Sender<Result<UplinkEnvelope, TrackerError>>,
    rx: mpsc::Receiver<Result<UplinkEnvelope, TrackerError>>,
}

pub struct MqttClient {
    _client: AsyncClient,
    rx: mpsc::Receiver<Result<UplinkEnvelope, TrackerError>>,
    _handle: tokio::task::JoinHandle<Result<(), TrackerError>>,
}

impl MqttClientBuilder {
    /// Create a new MQTT client
    pub fn new(config: &MqttConfig) -> Result<Self, TrackerError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

        if config.tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        let (tx, rx) = mpsc::channel(100);

        Ok(Self {
            client,
            event_loop,
            tx,
            rx,
        })
    }

    /// Start the event loop; topics are subscribed on every (re)connect
    pub async fn connect(self, topics: &[String]) -> Result<MqttClient, TrackerError> {
        let topics = topics.to_vec();

        let _handle = tokio::spawn(Self::process_events(
            self.tx,
            self.event_loop,
            self.client.clone(),
            topics,
        ));

        Ok(MqttClient {
            _client: self.client,
            rx: self.rx,
            _handle,
        })
    }

    async fn subscribe(client: AsyncClient, topics: &[String]) -> Result<(), TrackerError> {
        for topic in topics.iter() {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on its own after a lost connection, but the
    /// subscriptions are gone with the old session, so they are renewed on
    /// every ConnAck.
    ///
    /// NOTE: If topic subscription fails, the loop will break and return an error.
    async fn process_events(
        tx: mpsc::Sender<Result<UplinkEnvelope, TrackerError>>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
    ) -> Result<(), TrackerError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(client.clone(), &topics).await {
                        error!("Failed to subscribe: {}", e);
                        break Err(e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if Self::forward_publish(&tx, &publish.topic, &publish.payload)
                        .await
                        .is_break()
                    {
                        warn!("Uplink receiver closed, stopping MQTT event loop");
                        break Ok(());
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                _ => continue,
            }
        }
    }

    /// Parse a publish and hand it to the receiver.
    ///
    /// Unparseable publishes are skipped. Breaks once the receiver is gone.
    async fn forward_publish(
        tx: &mpsc::Sender<Result<UplinkEnvelope, TrackerError>>,
        topic: &str,
        payload: &[u8],
    ) -> ControlFlow<()> {
        match Self::parse_message(topic, payload) {
            Ok(envelope) => {
                if tx.send(Ok(envelope)).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            Err(e) => warn!("Failed to parse uplink: {}", e),
        }
        ControlFlow::Continue(())
    }

    /// Parse an uplink published on `.../devices/{device_id}/up`
    fn parse_message(topic: &str, payload: &[u8]) -> Result<UplinkEnvelope, TrackerError> {
        let parts: Vec<&str> = topic.split('/').collect();

        if parts.len() < 3 || parts[parts.len() - 1] != "up" {
            return Err(TrackerError::InvalidTopic(topic.to_string()));
        }

        UplinkEnvelope::from_slice(payload)
    }
}

impl MqttClient {
    /// Receive next uplink
    pub async fn recv(&mut self) -> Result<Option<UplinkEnvelope>, TrackerError> {
        self.rx.recv().await.transpose()
    }
}

/// Feed uplinks from the subscription into the store until the channel closes
pub async fn run_uplink_subscriber(
    mut mqtt_client: MqttClient,
    store: Arc<dyn SpotStore>,
) -> Result<(), TrackerError> {
    loop {
        match mqtt_client.recv().await {
            Ok(Some(envelope)) => match uplink::ingest(store.as_ref(), &envelope).await {
                Ok(report) => info!(
                    device_id = envelope.device_id().unwrap_or("unknown"),
                    observations = report.observations,
                    updated = report.updated,
                    "Ingested MQTT uplink"
                ),
                Err(e) => error!("Uplink processing error: {}", e),
            },
            Ok(None) => break, // Channel closed
            Err(e) => {
                error!("MQTT receive error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
