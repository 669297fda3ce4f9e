//! Assignment algorithm - pick the car to serve a call
//!
//! Nearest idle car wins, measured as absolute floor distance to the
//! call's origin; ties go to the earliest-provisioned car. With no idle
//! car the first known car takes the call (it queues behind that car's
//! current work), and with no cars at all a fresh id is minted for the
//! dispatcher to provision lazily.

use crate::domain::types::{CarId, Mode};
use crate::io::store::Store;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AssignmentSelector {
    store: Arc<dyn Store>,
}

impl AssignmentSelector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Select a car for a call originating at `from_floor`.
    ///
    /// Never fails: a store error degrades to provisioning a new car so
    /// the call is still served.
    pub async fn assign(&self, from_floor: i32) -> CarId {
        let cars = match self.store.scan_all().await {
            Ok(cars) => cars,
            Err(e) => {
                warn!(error = %e, "assignment_scan_failed_provisioning");
                return CarId::provision();
            }
        };

        if cars.is_empty() {
            debug!("assignment_no_cars_provisioning");
            return CarId::provision();
        }

        // min_by_key keeps the first minimum, which preserves the
        // provisioning-order tie-break from scan_all
        let nearest_idle = cars
            .iter()
            .filter(|car| car.mode == Mode::Idle)
            .min_by_key(|car| (car.current_floor - from_floor).abs());

        match nearest_idle {
            Some(car) => {
                debug!(car = %car.id, floor = %car.current_floor, from = %from_floor, "assignment_nearest_idle");
                car.id.clone()
            }
            None => {
                // Everyone is busy; the call queues behind the first car
                debug!(car = %cars[0].id, "assignment_all_busy_queueing");
                cars[0].id.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::car::Car;
    use crate::io::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    async fn store_with(cars: Vec<Car>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for car in &cars {
            store.put(car).await.unwrap();
        }
        store
    }

    fn idle_car(id: &str, floor: i32, created_at: u64) -> Car {
        Car::new(CarId::new(id), floor, created_at)
    }

    fn busy_car(id: &str, floor: i32, created_at: u64) -> Car {
        let mut car = idle_car(id, floor, created_at);
        car.call(floor, floor + 2, created_at).unwrap();
        car
    }

    #[tokio::test]
    async fn test_assigns_nearest_idle() {
        let store =
            store_with(vec![idle_car("car-a", 4, 1_000), idle_car("car-b", 8, 2_000)]).await;
        let selector = AssignmentSelector::new(store);

        assert_eq!(selector.assign(5).await, CarId::new("car-a"));
        assert_eq!(selector.assign(7).await, CarId::new("car-b"));
    }

    #[tokio::test]
    async fn test_tie_goes_to_earliest_provisioned() {
        let store =
            store_with(vec![idle_car("car-a", 4, 1_000), idle_car("car-b", 6, 2_000)]).await;
        let selector = AssignmentSelector::new(store);

        // Both are one floor away from 5
        assert_eq!(selector.assign(5).await, CarId::new("car-a"));
    }

    #[tokio::test]
    async fn test_all_busy_falls_back_to_first() {
        let store =
            store_with(vec![busy_car("car-a", 0, 1_000), busy_car("car-b", 9, 2_000)]).await;
        let selector = AssignmentSelector::new(store);

        // car-b is closer to floor 9 but neither is idle
        assert_eq!(selector.assign(9).await, CarId::new("car-a"));
    }

    #[tokio::test]
    async fn test_busy_nearby_loses_to_idle_far_away() {
        let store =
            store_with(vec![busy_car("car-a", 5, 1_000), idle_car("car-b", 0, 2_000)]).await;
        let selector = AssignmentSelector::new(store);

        assert_eq!(selector.assign(5).await, CarId::new("car-b"));
    }

    #[tokio::test]
    async fn test_empty_store_provisions() {
        let selector = AssignmentSelector::new(Arc::new(MemoryStore::new()));
        let id = selector.assign(3).await;
        assert!(id.as_str().starts_with("car-"));
    }

    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        async fn get(&self, _id: &CarId) -> Result<Option<Car>, StoreError> {
            Err(StoreError::Transient("down".to_string()))
        }
        async fn put(&self, _car: &Car) -> Result<(), StoreError> {
            Err(StoreError::Transient("down".to_string()))
        }
        async fn scan_all(&self) -> Result<Vec<Car>, StoreError> {
            Err(StoreError::Transient("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_error_provisions() {
        let selector = AssignmentSelector::new(Arc::new(BrokenStore));
        let id = selector.assign(3).await;
        assert!(id.as_str().starts_with("car-"));
        // Distinct calls mint distinct cars
        assert_ne!(id, selector.assign(3).await);
    }

    #[tokio::test]
    async fn test_maintenance_car_never_assigned() {
        let mut down = idle_car("car-a", 5, 1_000);
        down.set_maintenance(1_001);
        let store = store_with(vec![down, idle_car("car-b", 0, 2_000)]).await;
        let selector = AssignmentSelector::new(store);

        assert_eq!(selector.assign(5).await, CarId::new("car-b"));
    }
}
