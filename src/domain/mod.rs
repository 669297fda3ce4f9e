//! Domain models - core types and the elevator state machine
//!
//! This module contains the canonical data types used throughout the system:
//! - `Car` - one simulated elevator unit and its pure transition logic
//! - `DomainEvent` - ordered, immutable events emitted by transitions
//! - `CarId`/`Mode`/`Direction`/`Lease` - shared value types
//! - `ValidationError`/`CallError` - call rejection taxonomy

pub mod car;
pub mod error;
pub mod event;
pub mod types;

// Re-export commonly used types at module level
pub use car::Car;
pub use error::{CallError, ValidationError};
pub use event::{DomainEvent, EventKind};
pub use types::{epoch_ms, CarId, Direction, Lease, Mode};
