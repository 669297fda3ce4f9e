//! Movement scheduler - exclusive, retried execution of car movement
//!
//! A pool of worker tasks pulls transit and door-phase jobs from the
//! in-process queue. At most one job runs per car at any time, enforced
//! twice: an in-memory claim taken atomically at dequeue, and a lease
//! persisted with every step write so exclusivity survives a restart.
//! Writers outside the pool (the dispatcher's call and maintenance
//! paths) serialize with step writes through a per-car write lock, as
//! snapshot puts are whole-value and would otherwise race.
//!
//! Each step (advance one floor, persist, notify) retries transient
//! store/log failures with exponential backoff; when the budget is
//! exhausted the job fails and the car is forced to a safe idle state.

pub mod queue;

use crate::domain::car::Car;
use crate::domain::event::{DomainEvent, EventKind};
use crate::domain::types::{epoch_ms, new_uuid_v7, CarId, Direction, Lease, Mode};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_log::{EventLog, LogError};
use crate::io::notify::{NotifySender, StatePayload};
use crate::io::store::{Store, StoreError};
use parking_lot::Mutex;
use queue::{Dequeued, EnqueueOpts, Job, JobId, JobQueue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};


/// A movement step failed after exhausting its retry budget
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Exponential backoff for step retries: base * 2^(attempt-1)
fn backoff_delay(opts: &EnqueueOpts, attempt: u32) -> Duration {
    opts.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

pub struct MovementScheduler {
    queue: Arc<JobQueue>,
    store: Arc<dyn Store>,
    log: Arc<dyn EventLog>,
    notify: NotifySender,
    metrics: Arc<Metrics>,
    config: Config,
    /// Cars with a job currently running; the dequeue claim
    running: Mutex<FxHashSet<CarId>>,
    /// Per-car write locks serializing every load-mutate-persist cycle.
    /// Shared with the dispatcher's call and maintenance paths; held for
    /// one read-modify-write at a time, never across pacing sleeps.
    locks: Mutex<FxHashMap<CarId, Arc<AsyncMutex<()>>>>,
    /// Lease owner id for this process
    owner: String,
}

impl MovementScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        log: Arc<dyn EventLog>,
        notify: NotifySender,
        metrics: Arc<Metrics>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(JobQueue::new()),
            store,
            log,
            notify,
            metrics,
            config,
            running: Mutex::new(FxHashSet::default()),
            locks: Mutex::new(FxHashMap::default()),
            owner: new_uuid_v7(),
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Exclusive guard for one car's read-modify-write cycle. Snapshots
    /// are whole-value puts, so every writer must load only after taking
    /// this guard or a concurrent step write erases its update.
    pub async fn lock_car(&self, id: &CarId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    fn job_opts(&self, delay_ms: u64) -> EnqueueOpts {
        EnqueueOpts {
            delay: Duration::from_millis(delay_ms),
            attempts: self.config.max_attempts(),
            backoff_base: Duration::from_millis(self.config.backoff_base_ms()),
        }
    }

    /// Enqueue a transit job, superseding any transit still waiting for
    /// the same car. Door-phase jobs are never superseded.
    pub fn submit_transit(&self, car: &CarId, from: i32, to: i32, direction: Direction) -> JobId {
        let superseded = self
            .queue
            .cancel_if_waiting(|job| matches!(job, Job::Transit { car: c, .. } if c == car));
        if superseded > 0 {
            self.metrics.record_jobs_superseded(superseded as u64);
            info!(car = %car, count = %superseded, "transit_jobs_superseded");
        }

        let id = self
            .queue
            .enqueue(Job::Transit { car: car.clone(), from, to, direction }, self.job_opts(0));
        info!(car = %car, from = %from, to = %to, direction = %direction, job_id = %id, "transit_job_enqueued");
        id
    }

    fn submit_door_phase(&self, car: &CarId, expected: Mode, delay_ms: u64) -> JobId {
        let id = self.queue.enqueue(
            Job::DoorPhase { car: car.clone(), expected },
            self.job_opts(delay_ms),
        );
        debug!(car = %car, expected = %expected, delay_ms = %delay_ms, job_id = %id, "door_phase_enqueued");
        id
    }

    /// Drop all waiting jobs for a car (used when it enters maintenance)
    pub fn cancel_waiting_for_car(&self, car: &CarId) -> usize {
        let canceled = self.queue.cancel_if_waiting(|job| job.car() == car);
        if canceled > 0 {
            self.metrics.record_jobs_superseded(canceled as u64);
            info!(car = %car, count = %canceled, "waiting_jobs_canceled");
        }
        canceled
    }

    /// Re-submit jobs for cars whose snapshots show interrupted movement.
    ///
    /// Run once at startup, after the store is populated. Held leases from
    /// a previous process are honored until they expire.
    pub async fn recover(&self) {
        let cars = match self.store.scan_all().await {
            Ok(cars) => cars,
            Err(e) => {
                warn!(error = %e, "recover_scan_failed");
                return;
            }
        };

        let mut resumed = 0usize;
        for car in cars {
            match car.mode {
                Mode::Moving => {
                    if let Some(target) = car.target_floor {
                        self.submit_transit(&car.id, car.current_floor, target, car.direction);
                        resumed += 1;
                    }
                }
                Mode::DoorsOpening => {
                    self.submit_door_phase(&car.id, Mode::DoorsOpening, self.config.door_open_ms());
                    resumed += 1;
                }
                Mode::DoorsOpen => {
                    self.submit_door_phase(&car.id, Mode::DoorsOpen, self.config.door_dwell_ms());
                    resumed += 1;
                }
                Mode::DoorsClosing => {
                    self.submit_door_phase(&car.id, Mode::DoorsClosing, self.config.door_close_ms());
                    resumed += 1;
                }
                Mode::Idle | Mode::Maintenance => {}
            }
        }

        info!(resumed = %resumed, "scheduler_recovered");
    }

    /// Spawn the worker pool
    pub fn spawn_workers(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) {
        for worker_id in 0..self.config.scheduler_workers() {
            let scheduler = Arc::clone(self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                scheduler.worker_loop(worker_id, shutdown).await;
            });
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %worker_id, "movement_worker_started");

        loop {
            let claim = |job: &Job| self.running.lock().insert(job.car().clone());

            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                dequeued = self.queue.dequeue(claim) => {
                    let car = dequeued.job.car().clone();
                    self.run_job(dequeued).await;
                    self.running.lock().remove(&car);
                    // Waiting jobs for this car are now claimable
                    self.queue.poke();
                }
            }
        }

        info!(worker_id = %worker_id, "movement_worker_stopped");
    }

    async fn run_job(&self, dequeued: Dequeued) {
        self.metrics.record_job_started();
        debug!(
            job_id = %dequeued.id,
            kind = %dequeued.job.kind(),
            car = %dequeued.job.car(),
            "job_started"
        );

        let result = match &dequeued.job {
            Job::Transit { car, from, to, .. } => {
                self.run_transit(car, *from, *to, &dequeued.opts).await
            }
            Job::DoorPhase { car, expected } => {
                self.run_door_phase(car, *expected, &dequeued.opts).await
            }
        };

        match result {
            Ok(()) => {
                self.queue.mark_completed(dequeued.id);
                self.metrics.record_job_completed();
            }
            Err(e) => {
                self.handle_job_failure(dequeued.job.car(), &e).await;
                self.queue.mark_failed(dequeued.id);
            }
        }
    }

    /// Drive one transit to arrival: sleep the per-floor travel time,
    /// advance one floor, persist, notify, repeat.
    ///
    /// The snapshot is reloaded before every step so concurrent changes
    /// (maintenance, a failed predecessor) are observed; a car no longer
    /// MOVING makes the job a completed no-op.
    async fn run_transit(
        &self,
        car_id: &CarId,
        from: i32,
        to: i32,
        opts: &EnqueueOpts,
    ) -> Result<(), StepError> {
        let guard = self.lock_car(car_id).await;
        let Some(mut car) = self.load_with_retry(car_id, opts).await? else {
            warn!(car = %car_id, "transit_job_unknown_car");
            return Ok(());
        };
        if car.mode != Mode::Moving || car.target_floor.is_none() {
            info!(car = %car_id, mode = %car.mode, "transit_job_stale");
            return Ok(());
        }

        let now = epoch_ms();
        if let Some(lease) = &car.lease {
            if lease.owner != self.owner && !lease.is_expired(now) {
                // Another process still owns this car; try again after
                // the lease has had time to expire
                warn!(car = %car_id, owner = %lease.owner, "lease_held_elsewhere");
                self.queue.enqueue(
                    Job::Transit { car: car_id.clone(), from, to, direction: car.direction },
                    EnqueueOpts {
                        delay: Duration::from_millis(self.config.backoff_base_ms()),
                        ..*opts
                    },
                );
                return Ok(());
            }
        }

        car.lease = Some(Lease::new(&self.owner, now, self.config.lease_ttl_ms()));
        self.persist_step(&car, &[], opts).await?;
        drop(guard);

        let travel = Duration::from_millis(self.config.floor_travel_ms());
        loop {
            tokio::time::sleep(travel).await;

            let _guard = self.lock_car(car_id).await;
            let Some(mut car) = self.load_with_retry(car_id, opts).await? else {
                warn!(car = %car_id, "transit_car_disappeared");
                return Ok(());
            };
            if car.mode != Mode::Moving {
                info!(car = %car_id, mode = %car.mode, "transit_interrupted");
                return Ok(());
            }

            let now = epoch_ms();
            car.lease = Some(Lease::new(&self.owner, now, self.config.lease_ttl_ms()));
            let arrived = car.advance_one_floor(now);
            let events: Vec<DomainEvent> = arrived.into_iter().collect();

            self.persist_step(&car, &events, opts).await?;
            self.metrics.record_step();
            self.notify_state(&car, Some((from, to)));
            debug!(car = %car_id, floor = %car.current_floor, "movement_step");

            if car.mode != Mode::Moving {
                info!(car = %car_id, floor = %car.current_floor, "transit_arrived");
                self.submit_door_phase(car_id, Mode::DoorsOpening, self.config.door_open_ms());
                return Ok(());
            }
        }
    }

    /// Advance the door cycle by one sub-state.
    ///
    /// The job carries the mode it expects to find; a mismatch means the
    /// phase was superseded (failure, maintenance) and the job is dropped.
    async fn run_door_phase(
        &self,
        car_id: &CarId,
        expected: Mode,
        opts: &EnqueueOpts,
    ) -> Result<(), StepError> {
        let _guard = self.lock_car(car_id).await;
        let Some(mut car) = self.load_with_retry(car_id, opts).await? else {
            warn!(car = %car_id, "door_phase_unknown_car");
            return Ok(());
        };
        if car.mode != expected {
            info!(car = %car_id, expected = %expected, actual = %car.mode, "door_phase_stale");
            return Ok(());
        }

        let now = epoch_ms();
        let events = car.door_advance(now);
        let movement = events.iter().find_map(|e| match e.kind {
            EventKind::MovementStarted { from, to, .. } => Some((from, to)),
            _ => None,
        });

        if car.mode.is_door_phase() {
            car.lease = Some(Lease::new(&self.owner, now, self.config.lease_ttl_ms()));
        } else {
            // Cycle over; a follow-up transit takes its own lease
            car.lease = None;
        }

        self.persist_step(&car, &events, opts).await?;
        self.notify_state(&car, None);
        debug!(car = %car_id, mode = %car.mode, "door_phase_advanced");

        match car.mode {
            Mode::DoorsOpen => {
                self.submit_door_phase(car_id, Mode::DoorsOpen, self.config.door_dwell_ms());
            }
            Mode::DoorsClosing => {
                self.submit_door_phase(car_id, Mode::DoorsClosing, self.config.door_close_ms());
            }
            Mode::Idle => {
                self.metrics.record_door_cycle();
            }
            Mode::Moving => {
                // Door close dispatched the next pending stop
                self.metrics.record_door_cycle();
                if let Some((from, to)) = movement {
                    self.submit_transit(car_id, from, to, car.direction);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Write one step durably: event log first, then the snapshot, under
    /// the job's retry budget. Notifications go out only after the write
    /// sticks; the idempotent log append makes retries safe.
    async fn persist_step(
        &self,
        car: &Car,
        events: &[DomainEvent],
        opts: &EnqueueOpts,
    ) -> Result<(), StepError> {
        let mut attempt = 1u32;
        loop {
            match self.try_write(car, events).await {
                Ok(()) => {
                    for event in events {
                        self.notify.send_event(event);
                    }
                    return Ok(());
                }
                Err(e) if attempt < opts.attempts => {
                    warn!(car = %car.id, attempt = %attempt, error = %e, "step_write_retry");
                    self.metrics.record_step_retry();
                    tokio::time::sleep(backoff_delay(opts, attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_write(&self, car: &Car, events: &[DomainEvent]) -> Result<(), StepError> {
        for event in events {
            self.log.append(event).await?;
        }
        self.store.put(car).await?;
        Ok(())
    }

    async fn load_with_retry(
        &self,
        id: &CarId,
        opts: &EnqueueOpts,
    ) -> Result<Option<Car>, StepError> {
        let mut attempt = 1u32;
        loop {
            match self.store.get(id).await {
                Ok(car) => return Ok(car),
                Err(e) if attempt < opts.attempts => {
                    warn!(car = %id, attempt = %attempt, error = %e, "store_read_retry");
                    self.metrics.record_step_retry();
                    tokio::time::sleep(backoff_delay(opts, attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// A job exhausted its retries: force the car to a safe idle state
    /// (best effort), log the failure event, and notify subscribers. The
    /// car must never be left reporting MOVING with a stale target.
    async fn handle_job_failure(&self, car_id: &CarId, error: &StepError) {
        error!(car = %car_id, error = %error, "movement_job_failed");
        self.metrics.record_job_failed();

        let _guard = self.lock_car(car_id).await;
        match self.store.get(car_id).await {
            Ok(Some(mut car)) => {
                let event = car.force_idle(&error.to_string(), epoch_ms());
                if let Err(e) = self.log.append(&event).await {
                    warn!(car = %car_id, error = %e, "failsafe_log_append_failed");
                }
                if let Err(e) = self.store.put(&car).await {
                    error!(car = %car_id, error = %e, "failsafe_write_failed");
                }
                self.notify.send_event(&event);
                self.notify_state(&car, None);
            }
            Ok(None) => warn!(car = %car_id, "failed_job_unknown_car"),
            Err(e) => error!(car = %car_id, error = %e, "failsafe_load_failed"),
        }

        self.notify.send_failure(car_id.as_str(), &error.to_string());
    }

    fn notify_state(&self, car: &Car, transit: Option<(i32, i32)>) {
        let progress = transit.and_then(|(from, to)| {
            let span = (to - from).abs();
            if span == 0 {
                None
            } else {
                Some(((car.current_floor - from).abs() * 100 / span).clamp(0, 100) as u8)
            }
        });

        self.notify.send_state(StatePayload {
            site: None,
            car: car.id.to_string(),
            floor: car.current_floor,
            mode: car.mode.as_str().to_string(),
            direction: car.direction.as_str().to_string(),
            target: car.target_floor,
            progress,
            seq: car.seq,
            ts: car.updated_at,
        });
    }
}
