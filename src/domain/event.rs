//! Domain events emitted by the elevator state machine
//!
//! Events are immutable after append and ordered by a per-car monotonic
//! sequence number assigned by the emitting car.

use crate::domain::types::{CarId, Direction};
use serde::{Deserialize, Serialize};

/// A single domain event for one car
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub car: CarId,
    /// Per-car monotonic sequence number
    pub seq: u64,
    /// Epoch milliseconds
    pub ts: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A call was accepted and its stops enqueued
    Called { from: i32, to: i32 },
    /// The car left IDLE and began a transit
    MovementStarted { from: i32, to: i32, direction: Direction },
    /// The car reached its target floor
    Arrived { floor: i32 },
    /// A movement job exhausted its retries; the car was forced safe
    JobFailed { reason: String },
    /// The car was taken out of service
    MaintenanceOn,
    /// The car was returned to service
    MaintenanceOff,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Called { .. } => "called",
            EventKind::MovementStarted { .. } => "movement_started",
            EventKind::Arrived { .. } => "arrived",
            EventKind::JobFailed { .. } => "job_failed",
            EventKind::MaintenanceOn => "maintenance_on",
            EventKind::MaintenanceOff => "maintenance_off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = DomainEvent {
            car: CarId::new("car-1"),
            seq: 3,
            ts: 1736012345678,
            kind: EventKind::MovementStarted { from: 2, to: 9, direction: Direction::Up },
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["car"], "car-1");
        assert_eq!(parsed["seq"], 3);
        assert_eq!(parsed["type"], "movement_started");
        assert_eq!(parsed["from"], 2);
        assert_eq!(parsed["to"], 9);
        assert_eq!(parsed["direction"], "UP");
    }

    #[test]
    fn test_event_roundtrip() {
        let event = DomainEvent {
            car: CarId::new("car-2"),
            seq: 1,
            ts: 42,
            kind: EventKind::Arrived { floor: 9 },
        };

        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_kind_as_str() {
        assert_eq!(EventKind::Called { from: 1, to: 2 }.as_str(), "called");
        assert_eq!(EventKind::JobFailed { reason: "x".into() }.as_str(), "job_failed");
        assert_eq!(EventKind::MaintenanceOn.as_str(), "maintenance_on");
    }
}
