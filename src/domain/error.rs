//! Error taxonomy for call handling
//!
//! Validation failures are rejected before any state mutation and never
//! retried; a car in maintenance surfaces `CarUnavailable` to the caller.
//! Transient store/log failures are a scheduler concern (see
//! `services::scheduler`) and carry their own types in `io`.

use crate::domain::types::CarId;
use thiserror::Error;

/// Rejected before any state mutation; never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("floor {floor} is outside the building (0..={max})")]
    FloorOutOfRange { floor: i32, max: i32 },
    #[error("from and to are the same floor ({floor})")]
    SameFloor { floor: i32 },
}

/// Why a call could not be accepted by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("car {0} is unavailable (maintenance)")]
    CarUnavailable(CarId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::FloorOutOfRange { floor: 120, max: 100 };
        assert_eq!(err.to_string(), "floor 120 is outside the building (0..=100)");

        let err = CallError::CarUnavailable(CarId::new("car-3"));
        assert_eq!(err.to_string(), "car car-3 is unavailable (maintenance)");
    }
}
