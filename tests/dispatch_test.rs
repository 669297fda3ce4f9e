//! End-to-end dispatch tests through the public API
//!
//! Drives calls through the dispatcher with a live scheduler worker pool
//! under a paused clock, and checks the resulting snapshots and event log.

use async_trait::async_trait;
use liftbank::domain::{Car, CarId, Direction, EventKind, Mode};
use liftbank::infra::{Config, Metrics};
use liftbank::io::{create_notify_channel, EventLog, MemoryEventLog, MemoryStore, Store, StoreError};
use liftbank::services::{Dispatcher, MovementScheduler};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

struct Bank {
    store: Arc<dyn Store>,
    log: Arc<MemoryEventLog>,
    dispatcher: Arc<Dispatcher>,
    _shutdown_tx: watch::Sender<bool>,
}

async fn bank() -> Bank {
    bank_with_store(Arc::new(MemoryStore::new())).await
}

async fn bank_with_store<S: Store + 'static>(store: Arc<S>) -> Bank {
    let log = Arc::new(MemoryEventLog::new());
    let metrics = Arc::new(Metrics::new());
    let (notify, _rx) = create_notify_channel(1024, "test".to_string());
    let config = Config::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = MovementScheduler::new(
        store.clone(),
        log.clone(),
        notify.clone(),
        metrics.clone(),
        config.clone(),
    );
    scheduler.spawn_workers(&shutdown_rx);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        log.clone(),
        notify,
        scheduler,
        metrics,
        config,
    ));
    dispatcher.init_fleet().await.unwrap();

    Bank { store, log, dispatcher, _shutdown_tx: shutdown_tx }
}

/// Store whose next put can be parked mid-flight: once armed, the put
/// signals `parked` and waits for the gate to open. Reads pass through.
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicU32,
    parked: AtomicBool,
    gate: tokio::sync::Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            armed: AtomicU32::new(0),
            parked: AtomicBool::new(false),
            gate: tokio::sync::Notify::new(),
        }
    }

    fn hold_next_put(&self) {
        self.armed.store(1, Ordering::SeqCst);
    }

    fn is_parked(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }

    fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn get(&self, id: &CarId) -> Result<Option<Car>, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, car: &Car) -> Result<(), StoreError> {
        if self.armed.load(Ordering::SeqCst) > 0 {
            self.armed.fetch_sub(1, Ordering::SeqCst);
            self.parked.store(true, Ordering::SeqCst);
            self.gate.notified().await;
            self.parked.store(false, Ordering::SeqCst);
        }
        self.inner.put(car).await
    }

    async fn scan_all(&self) -> Result<Vec<Car>, StoreError> {
        self.inner.scan_all().await
    }
}

async fn wait_for_idle_at(bank: &Bank, id: &CarId, floor: i32) {
    for _ in 0..4_000 {
        let snap = bank.store.get(id).await.unwrap().unwrap();
        if snap.mode == Mode::Idle && snap.current_floor == floor {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let snap = bank.store.get(id).await.unwrap().unwrap();
    panic!("car {id} never settled at {floor}: at {} in {:?}", snap.current_floor, snap.mode);
}

#[tokio::test(start_paused = true)]
async fn test_call_runs_to_completion() {
    let bank = bank().await;

    // All cars idle at floor 0; first provisioned takes the call
    let id = bank.dispatcher.call(2, 9, None).await.unwrap();
    assert_eq!(id, CarId::new("car-1"));

    // The car first serves the pickup at 2, then the destination at 9
    wait_for_idle_at(&bank, &id, 9).await;

    let snap = bank.store.get(&id).await.unwrap().unwrap();
    assert_eq!(snap.direction, Direction::Idle);
    assert_eq!(snap.target_floor, None);
    assert!(snap.pending_stops.is_empty());
    assert!(snap.is_consistent());

    let events = bank.log.query(Some(&id), None).await.unwrap();
    let kinds: Vec<&'static str> = events.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["called", "movement_started", "arrived", "movement_started", "arrived"]
    );
    assert!(matches!(events[2].kind, EventKind::Arrived { floor: 2 }));
    assert!(matches!(events[4].kind, EventKind::Arrived { floor: 9 }));

    // Ordering is strict per car
    let mut last = 0;
    for event in &events {
        assert!(event.seq > last);
        last = event.seq;
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_call_leaves_no_trace() {
    let bank = bank().await;

    assert!(bank.dispatcher.call(5, 5, None).await.is_err());
    assert!(bank.dispatcher.call(0, 99, None).await.is_err());

    assert!(bank.log.query(None, None).await.unwrap().is_empty());
    for car in bank.store.scan_all().await.unwrap() {
        assert_eq!(car.mode, Mode::Idle);
        assert!(car.pending_stops.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_spread_across_fleet() {
    let bank = bank().await;

    let first = bank.dispatcher.call(0, 5, None).await.unwrap();
    let second = bank.dispatcher.call(9, 2, None).await.unwrap();
    assert_ne!(first, second);

    wait_for_idle_at(&bank, &first, 5).await;
    wait_for_idle_at(&bank, &second, 2).await;

    // The second car rode 0 -> 9 for pickup, then down to 2
    let events = bank.log.query(Some(&second), None).await.unwrap();
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::Arrived { floor: 9 })));
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::Arrived { floor: 2 })));
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_cycle_returns_car_to_rotation() {
    let bank = bank().await;
    let id = CarId::new("car-1");

    bank.dispatcher.set_maintenance(&id).await.unwrap();
    assert!(bank.dispatcher.call(3, 7, Some(id.clone())).await.is_err());

    // Untargeted calls route around the down car
    let assigned = bank.dispatcher.call(0, 5, None).await.unwrap();
    assert_ne!(assigned, id);

    bank.dispatcher.resume(&id).await.unwrap();
    let snap = bank.store.get(&id).await.unwrap().unwrap();
    assert_eq!(snap.mode, Mode::Idle);

    // Back in rotation
    let targeted = bank.dispatcher.call(0, 4, Some(id.clone())).await.unwrap();
    assert_eq!(targeted, id);
    wait_for_idle_at(&bank, &id, 4).await;
}

#[tokio::test(start_paused = true)]
async fn test_ride_along_call_survives_in_flight_step_write() {
    let store = Arc::new(GatedStore::new());
    let bank = bank_with_store(store.clone()).await;
    let id = CarId::new("car-1");

    let assigned = bank.dispatcher.call(0, 9, Some(id.clone())).await.unwrap();
    assert_eq!(assigned, id);

    // Let the transit get under way
    for _ in 0..1_000 {
        if bank.store.get(&id).await.unwrap().unwrap().current_floor >= 1 {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    // Park the next step write mid-flight
    store.hold_next_put();
    for _ in 0..1_000 {
        if store.is_parked() {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(store.is_parked());

    // A second call lands while that write is still in the air. It must
    // wait for the step to finish, then append to the fresh snapshot;
    // appending to the pre-step copy would let the step erase its stops.
    let dispatcher = bank.dispatcher.clone();
    let target = id.clone();
    let call = tokio::spawn(async move { dispatcher.call(3, 4, Some(target)).await });

    sleep(Duration::from_millis(200)).await;
    assert!(!call.is_finished(), "call went through around an in-flight step write");

    store.open();
    let accepted = call.await.unwrap().unwrap();
    assert_eq!(accepted, id);

    // Original destination first, then both ride-along stops
    wait_for_idle_at(&bank, &id, 4).await;

    let snap = bank.store.get(&id).await.unwrap().unwrap();
    assert!(snap.pending_stops.is_empty());

    let events = bank.log.query(Some(&id), None).await.unwrap();
    for expected in [9, 3, 4] {
        assert!(
            events
                .iter()
                .any(|e| matches!(e.kind, EventKind::Arrived { floor } if floor == expected)),
            "no arrival at floor {expected}"
        );
    }
}
