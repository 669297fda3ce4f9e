//! Services - the dispatch and movement pipeline
//!
//! - `assignment` - nearest-idle car selection
//! - `dispatcher` - call intake, validation, persistence, fleet management
//! - `scheduler` - exclusive per-car movement execution with retry

pub mod assignment;
pub mod dispatcher;
pub mod scheduler;

pub use assignment::AssignmentSelector;
pub use dispatcher::{DispatchError, Dispatcher};
pub use scheduler::MovementScheduler;
