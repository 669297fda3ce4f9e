//! State store adapter - fast shared key space for live car snapshots
//!
//! The store is the single source of truth for "current" car state. Many
//! callers may read concurrently; only the scheduler (and the dispatcher
//! on the call path) write, one in-flight mutator per car.

use crate::domain::car::Car;
use crate::domain::types::CarId;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Store failures. `Transient` is retryable inside the scheduler's
/// backoff budget; nothing else is.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),
}

/// Live snapshot store contract. Implementations must give a single
/// caller read-your-writes consistency.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, id: &CarId) -> Result<Option<Car>, StoreError>;
    async fn put(&self, car: &Car) -> Result<(), StoreError>;
    /// All known cars in provisioning order (stable enumeration - the
    /// assignment tie-break depends on it).
    async fn scan_all(&self) -> Result<Vec<Car>, StoreError>;
}

/// In-process store backed by a read/write-locked map
#[derive(Default)]
pub struct MemoryStore {
    cars: RwLock<FxHashMap<CarId, Car>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &CarId) -> Result<Option<Car>, StoreError> {
        Ok(self.cars.read().get(id).cloned())
    }

    async fn put(&self, car: &Car) -> Result<(), StoreError> {
        self.cars.write().insert(car.id.clone(), car.clone());
        Ok(())
    }

    async fn scan_all(&self) -> Result<Vec<Car>, StoreError> {
        let mut cars: Vec<Car> = self.cars.read().values().cloned().collect();
        // Provisioning order; id as tie-break for cars created in the same ms
        cars.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(cars)
    }
}
