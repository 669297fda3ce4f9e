//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `store` - fast state store for live car snapshots
//! - `event_log` - durable, ordered event log (JSONL format)
//! - `notify` - typed channel for the notification fan-out
//! - `mqtt_egress` - MQTT publisher draining the notify channel
//! - `http` - call/status/metrics HTTP API

pub mod event_log;
pub mod http;
pub mod mqtt_egress;
pub mod notify;
pub mod store;

// Re-export commonly used types
pub use event_log::{EventLog, JsonlEventLog, LogError, MemoryEventLog};
pub use mqtt_egress::MqttPublisher;
pub use notify::{create_notify_channel, NotifyMessage, NotifySender};
pub use store::{MemoryStore, Store, StoreError};
