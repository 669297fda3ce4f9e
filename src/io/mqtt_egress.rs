//! MQTT publisher for the notification fan-out
//!
//! Publishes elevator updates to MQTT topics for downstream subscribers:
//! - lift/state - per-step state deltas (QoS 0)
//! - lift/events - domain events (QoS 1)
//! - lift/failures - movement job failures (QoS 1)
//! - lift/metrics - periodic metrics snapshots (QoS 0)
//!
//! Ordering per car is only as strong as the scheduler's write-then-notify
//! sequencing; across cars there is no ordering guarantee.

use crate::infra::config::Config;
use crate::io::notify::NotifyMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Drains the notify channel and publishes each message to its topic.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<NotifyMessage>,
    state_topic: String,
    events_topic: String,
    failures_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new publisher connected to the configured broker
    pub fn new(config: &Config, rx: mpsc::Receiver<NotifyMessage>) -> Self {
        let client_id = format!("liftbank-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        // Eventloop must be polled for the client to make progress
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            state_topic: config.notify_state_topic().to_string(),
            events_topic: config.notify_events_topic().to_string(),
            failures_topic: config.notify_failures_topic().to_string(),
            metrics_topic: config.notify_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until the shutdown signal flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            state = %self.state_topic,
            events = %self.events_topic,
            failures = %self.failures_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    if changed.is_err() || *shutdown.borrow() {
                        // Drain whatever is already queued before exiting
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        info!("mqtt_egress_shutdown");
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: NotifyMessage) {
        match msg {
            NotifyMessage::State(payload) => {
                self.publish_json(&self.state_topic, QoS::AtMostOnce, &payload).await;
            }
            NotifyMessage::Event(payload) => {
                // At-least-once: events feed dashboards that audit transitions
                self.publish_json(&self.events_topic, QoS::AtLeastOnce, &payload).await;
            }
            NotifyMessage::Failure(payload) => {
                self.publish_json(&self.failures_topic, QoS::AtLeastOnce, &payload).await;
            }
            NotifyMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, QoS::AtMostOnce, &payload).await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, topic = %topic, "mqtt_egress_serialize_failed");
                return;
            }
        };

        if let Err(e) = self.client.publish(topic, qos, false, json.into_bytes()).await {
            debug!(error = %e, topic = %topic, "mqtt_egress_publish_failed");
        }
    }
}
