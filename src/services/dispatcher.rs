//! Dispatcher - the call intake and fleet management surface
//!
//! Validates calls, selects a car (or honors a targeted call, lazily
//! provisioning unknown ids), applies the state machine transition,
//! persists it (event log first, then the snapshot) and hands any started
//! movement to the scheduler. Also serves status/event reads and the
//! maintenance switches.

use crate::domain::car::Car;
use crate::domain::error::{CallError, ValidationError};
use crate::domain::event::{DomainEvent, EventKind};
use crate::domain::types::{epoch_ms, CarId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_log::{EventLog, LogError};
use crate::io::notify::NotifySender;
use crate::io::store::{Store, StoreError};
use crate::services::assignment::AssignmentSelector;
use crate::services::scheduler::MovementScheduler;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("state store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("event log unavailable: {0}")]
    Log(#[from] LogError),
}

impl From<ValidationError> for DispatchError {
    fn from(e: ValidationError) -> Self {
        DispatchError::Call(CallError::Validation(e))
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    log: Arc<dyn EventLog>,
    notify: NotifySender,
    scheduler: Arc<MovementScheduler>,
    selector: AssignmentSelector,
    metrics: Arc<Metrics>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        log: Arc<dyn EventLog>,
        notify: NotifySender,
        scheduler: Arc<MovementScheduler>,
        metrics: Arc<Metrics>,
        config: Config,
    ) -> Self {
        let selector = AssignmentSelector::new(store.clone());
        Self { store, log, notify, scheduler, selector, metrics, config }
    }

    /// Provision the initial fleet (car-1..car-N at floor 0), skipping ids
    /// that already exist in the store.
    pub async fn init_fleet(&self) -> Result<(), DispatchError> {
        let mut provisioned = 0u32;
        for i in 1..=self.config.initial_cars() {
            let id = CarId::new(format!("car-{i}"));
            let _guard = self.scheduler.lock_car(&id).await;
            if self.store.get(&id).await?.is_none() {
                let car = Car::new(id, 0, epoch_ms());
                self.store.put(&car).await?;
                self.metrics.record_car_provisioned();
                provisioned += 1;
            }
        }
        info!(provisioned = %provisioned, total = %self.config.initial_cars(), "fleet_initialized");
        Ok(())
    }

    /// Accept a call from `from` to `to`, optionally targeted at a
    /// specific car. Returns the id of the car that took the call.
    ///
    /// Validation happens before any car is selected or mutated; a
    /// rejected call leaves no trace in the store or the log.
    pub async fn call(
        &self,
        from: i32,
        to: i32,
        target: Option<CarId>,
    ) -> Result<CarId, DispatchError> {
        if let Err(e) = self.validate(from, to) {
            self.metrics.record_call_rejected();
            return Err(e.into());
        }

        let id = match target {
            Some(id) => id,
            None => self.selector.assign(from).await,
        };

        // Serialize with scheduler step writes for this car: a call that
        // reads the snapshot while a step write is in flight would append
        // its stops to a stale copy, and the landing step would erase them
        let _guard = self.scheduler.lock_car(&id).await;

        let now = epoch_ms();
        let mut car = match self.store.get(&id).await? {
            Some(car) => car,
            None => {
                // Targeted call for an unknown car, or the selector had
                // nothing to offer: provision on the spot
                self.metrics.record_car_provisioned();
                info!(car = %id, "car_provisioned");
                Car::new(id.clone(), 0, now)
            }
        };

        let events = match car.call(from, to, now) {
            Ok(events) => events,
            Err(e) => {
                self.metrics.record_call_rejected();
                return Err(e.into());
            }
        };

        self.persist(&car, &events).await?;
        self.metrics.record_call();
        info!(car = %id, from = %from, to = %to, "call_accepted");

        if let Some((f, t, d)) = events.iter().find_map(|e| match e.kind {
            EventKind::MovementStarted { from, to, direction } => Some((from, to, direction)),
            _ => None,
        }) {
            self.scheduler.submit_transit(&id, f, t, d);
        }

        Ok(id)
    }

    /// Snapshot of one car
    pub async fn status(&self, id: &CarId) -> Result<Option<Car>, DispatchError> {
        Ok(self.store.get(id).await?)
    }

    /// Snapshots of the whole fleet, in provisioning order
    pub async fn status_all(&self) -> Result<Vec<Car>, DispatchError> {
        Ok(self.store.scan_all().await?)
    }

    /// Query the event log
    pub async fn events(
        &self,
        car: Option<&CarId>,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<DomainEvent>, DispatchError> {
        Ok(self.log.query(car, range).await?)
    }

    /// Take a car out of service. Waiting jobs are dropped; a running job
    /// notices the mode change and stops on its own. Returns false for an
    /// unknown car.
    pub async fn set_maintenance(&self, id: &CarId) -> Result<bool, DispatchError> {
        let _guard = self.scheduler.lock_car(id).await;
        let Some(mut car) = self.store.get(id).await? else {
            return Ok(false);
        };

        let canceled = self.scheduler.cancel_waiting_for_car(id);
        let event = car.set_maintenance(epoch_ms());
        car.lease = None;
        self.persist(&car, std::slice::from_ref(&event)).await?;
        info!(car = %id, canceled_jobs = %canceled, "maintenance_set");
        Ok(true)
    }

    /// Return a car to service; pending stops it kept are redispatched.
    pub async fn resume(&self, id: &CarId) -> Result<bool, DispatchError> {
        let _guard = self.scheduler.lock_car(id).await;
        let Some(mut car) = self.store.get(id).await? else {
            return Ok(false);
        };

        let events = car.clear_maintenance(epoch_ms());
        if events.is_empty() {
            // Was not in maintenance; nothing to do
            return Ok(true);
        }

        self.persist(&car, &events).await?;
        info!(car = %id, "maintenance_cleared");

        if let Some((f, t, d)) = events.iter().find_map(|e| match e.kind {
            EventKind::MovementStarted { from, to, direction } => Some((from, to, direction)),
            _ => None,
        }) {
            self.scheduler.submit_transit(id, f, t, d);
        }

        Ok(true)
    }

    fn validate(&self, from: i32, to: i32) -> Result<(), ValidationError> {
        for floor in [from, to] {
            if !self.config.is_valid_floor(floor) {
                return Err(ValidationError::FloorOutOfRange { floor, max: self.config.floors() });
            }
        }
        if from == to {
            return Err(ValidationError::SameFloor { floor: from });
        }
        Ok(())
    }

    /// Log first, then the snapshot, then best-effort fan-out. Unlike a
    /// scheduler step this is not retried: the caller gets the error and
    /// can resubmit the call.
    async fn persist(&self, car: &Car, events: &[DomainEvent]) -> Result<(), DispatchError> {
        for event in events {
            self.log.append(event).await?;
        }
        self.store.put(car).await?;
        for event in events {
            self.notify.send_event(event);
        }
        Ok(())
    }
}
