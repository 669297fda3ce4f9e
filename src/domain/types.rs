//! Shared types for the elevator bank

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for car identifiers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarId(pub String);

impl CarId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint an id for a freshly provisioned car
    pub fn provision() -> Self {
        Self(format!("car-{}", new_uuid_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discrete operating state of a car
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Idle,
    Moving,
    DoorsOpening,
    DoorsOpen,
    DoorsClosing,
    Maintenance,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Moving => "MOVING",
            Mode::DoorsOpening => "DOORS_OPENING",
            Mode::DoorsOpen => "DOORS_OPEN",
            Mode::DoorsClosing => "DOORS_CLOSING",
            Mode::Maintenance => "MAINTENANCE",
        }
    }

    /// True for the three door sub-states
    pub fn is_door_phase(&self) -> bool {
        matches!(self, Mode::DoorsOpening | Mode::DoorsOpen | Mode::DoorsClosing)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Travel direction of a car
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Up,
    Down,
    Idle,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Idle => "IDLE",
        }
    }

    /// Floor delta for one movement step
    #[inline]
    pub fn delta(&self) -> i32 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
            Direction::Idle => 0,
        }
    }

    /// Direction from one floor toward another
    pub fn between(from: i32, to: i32) -> Self {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
            std::cmp::Ordering::Equal => Direction::Idle,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusivity token proving a single owner is mutating a car's state.
///
/// Stored alongside the snapshot so exclusivity survives process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: u64,
}

impl Lease {
    pub fn new(owner: &str, now: u64, ttl_ms: u64) -> Self {
        Self { owner: owner.to_string(), expires_at: now + ttl_ms }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(Direction::between(2, 9), Direction::Up);
        assert_eq!(Direction::between(9, 2), Direction::Down);
        assert_eq!(Direction::between(5, 5), Direction::Idle);
    }

    #[test]
    fn test_direction_delta() {
        assert_eq!(Direction::Up.delta(), 1);
        assert_eq!(Direction::Down.delta(), -1);
        assert_eq!(Direction::Idle.delta(), 0);
    }

    #[test]
    fn test_mode_serde_format() {
        let json = serde_json::to_string(&Mode::DoorsOpening).unwrap();
        assert_eq!(json, "\"DOORS_OPENING\"");
        let back: Mode = serde_json::from_str("\"MAINTENANCE\"").unwrap();
        assert_eq!(back, Mode::Maintenance);
    }

    #[test]
    fn test_lease_expiry() {
        let lease = Lease::new("worker-1", 1_000, 500);
        assert!(!lease.is_expired(1_200));
        assert!(lease.is_expired(1_500));
        assert!(lease.is_expired(2_000));
    }

    #[test]
    fn test_provisioned_ids_unique() {
        let a = CarId::provision();
        let b = CarId::provision();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("car-"));
    }
}
