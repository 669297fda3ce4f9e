//! Typed channel for the notification fan-out
//!
//! Best-effort delivery to the MQTT publisher: bounded mpsc, `try_send`,
//! drop-on-full. A slow or absent subscriber must never stall the
//! movement scheduler, so nothing here blocks or retries.

use crate::domain::event::DomainEvent;
use crate::domain::types::epoch_ms;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum NotifyMessage {
    /// Per-step state delta for live display
    State(StatePayload),
    /// Domain event (called, movement_started, arrived, ...)
    Event(EventPayload),
    /// A movement job exhausted its retries
    Failure(FailurePayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Live state delta published after each persisted step
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub car: String,
    pub floor: i32,
    pub mode: String,
    pub direction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<i32>,
    /// Transit progress 0-100, present only while moving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Snapshot sequence number at the time of the delta
    pub seq: u64,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

/// Domain event payload
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

/// Failure notification
#[derive(Debug, Clone, Serialize)]
pub struct FailurePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub car: String,
    pub error: String,
    pub ts: u64,
}

/// Periodic metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    pub calls_total: u64,
    pub calls_rejected: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_superseded: u64,
    pub steps_total: u64,
    pub step_retries: u64,
    pub door_cycles: u64,
    pub cars_provisioned: u64,
}

/// Sender handle for notifications
///
/// Clone this to share across producers. Non-blocking - if the channel is
/// full, messages are dropped.
#[derive(Clone)]
pub struct NotifySender {
    tx: mpsc::Sender<NotifyMessage>,
    site_id: String,
}

impl NotifySender {
    pub fn new(tx: mpsc::Sender<NotifyMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a state delta, injecting the site id
    pub fn send_state(&self, mut payload: StatePayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(NotifyMessage::State(payload));
    }

    /// Send a domain event
    pub fn send_event(&self, event: &DomainEvent) {
        let payload = EventPayload { site: Some(self.site_id.clone()), event: event.clone() };
        let _ = self.tx.try_send(NotifyMessage::Event(payload));
    }

    /// Send a job failure notification
    pub fn send_failure(&self, car: &str, error: &str) {
        let payload = FailurePayload {
            site: Some(self.site_id.clone()),
            car: car.to_string(),
            error: error.to_string(),
            ts: epoch_ms(),
        };
        let _ = self.tx.try_send(NotifyMessage::Failure(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, mut payload: MetricsPayload) {
        payload.site = self.site_id.clone();
        payload.ts = epoch_ms();
        let _ = self.tx.try_send(NotifyMessage::Metrics(payload));
    }
}

/// Create a new notify channel pair
///
/// Returns (sender, receiver) where the sender can be cloned and shared.
pub fn create_notify_channel(
    buffer_size: usize,
    site_id: String,
) -> (NotifySender, mpsc::Receiver<NotifyMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (NotifySender::new(tx, site_id), rx)
}
