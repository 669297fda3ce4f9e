//! Elevator state machine
//!
//! Pure transition logic: every operation mutates the car and returns the
//! domain events it emitted. No I/O happens here; persisting the snapshot,
//! appending the events and notifying subscribers is the caller's job.
//!
//! Mode cycle: IDLE -> MOVING -> DOORS_OPENING -> DOORS_OPEN ->
//! DOORS_CLOSING -> IDLE, with MAINTENANCE reachable from any state and
//! only cleared externally.

use crate::domain::error::CallError;
use crate::domain::event::{DomainEvent, EventKind};
use crate::domain::types::{CarId, Direction, Lease, Mode};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Events emitted by a single transition (at most two: called + dispatched)
pub type Emitted = SmallVec<[DomainEvent; 2]>;

/// Materialized state of one elevator car.
///
/// This struct doubles as the snapshot stored in the state store; the
/// `lease` field is the scheduler's exclusivity token and is opaque to the
/// state machine itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub current_floor: i32,
    pub mode: Mode,
    pub direction: Direction,
    pub target_floor: Option<i32>,
    /// FIFO of floors not yet served, deduplicated on enqueue
    pub pending_stops: VecDeque<i32>,
    /// Monotonic event counter; assigned to every emitted event
    pub seq: u64,
    #[serde(default)]
    pub lease: Option<Lease>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Car {
    pub fn new(id: CarId, initial_floor: i32, now: u64) -> Self {
        Self {
            id,
            current_floor: initial_floor,
            mode: Mode::Idle,
            direction: Direction::Idle,
            target_floor: None,
            pending_stops: VecDeque::new(),
            seq: 0,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn emit(&mut self, kind: EventKind, now: u64) -> DomainEvent {
        self.seq += 1;
        self.updated_at = now;
        DomainEvent { car: self.id.clone(), seq: self.seq, ts: now, kind }
    }

    /// Accept a call: enqueue both floors (deduplicated) and, if the car is
    /// idle, immediately dispatch the next stop.
    ///
    /// Fails with `CarUnavailable` before mutating anything when the car is
    /// in maintenance. Floor range validation happens upstream in the
    /// dispatcher, before a car is even selected.
    pub fn call(&mut self, from: i32, to: i32, now: u64) -> Result<Emitted, CallError> {
        if self.mode == Mode::Maintenance {
            return Err(CallError::CarUnavailable(self.id.clone()));
        }

        self.enqueue_stop(from);
        self.enqueue_stop(to);

        let mut events: Emitted = SmallVec::new();
        events.push(self.emit(EventKind::Called { from, to }, now));

        if self.mode == Mode::Idle {
            events.extend(self.dispatch_next(now));
        }

        Ok(events)
    }

    fn enqueue_stop(&mut self, floor: i32) {
        if !self.pending_stops.contains(&floor) {
            self.pending_stops.push_back(floor);
        }
    }

    /// Pop the next stop and start moving toward it.
    ///
    /// No-op unless the car is idle with pending stops. Stops equal to the
    /// current floor are discarded (a call for the car's own floor needs no
    /// movement) and the scan continues to the first floor that differs.
    pub fn dispatch_next(&mut self, now: u64) -> Emitted {
        let mut events: Emitted = SmallVec::new();
        if self.mode != Mode::Idle {
            return events;
        }

        while let Some(stop) = self.pending_stops.pop_front() {
            if stop == self.current_floor {
                self.direction = Direction::Idle;
                continue;
            }

            self.direction = Direction::between(self.current_floor, stop);
            self.target_floor = Some(stop);
            self.mode = Mode::Moving;
            events.push(self.emit(
                EventKind::MovementStarted {
                    from: self.current_floor,
                    to: stop,
                    direction: self.direction,
                },
                now,
            ));
            break;
        }

        events
    }

    /// Move exactly one floor toward the target.
    ///
    /// Valid only while MOVING; returns the `Arrived` event when the target
    /// is reached, at which point the door cycle begins.
    pub fn advance_one_floor(&mut self, now: u64) -> Option<DomainEvent> {
        if self.mode != Mode::Moving {
            return None;
        }
        let target = self.target_floor?;

        self.current_floor += self.direction.delta();
        self.updated_at = now;

        if self.current_floor == target {
            self.mode = Mode::DoorsOpening;
            self.direction = Direction::Idle;
            self.target_floor = None;
            return Some(self.emit(EventKind::Arrived { floor: self.current_floor }, now));
        }

        None
    }

    /// Advance the door cycle by one sub-state.
    ///
    /// DOORS_OPENING -> DOORS_OPEN -> DOORS_CLOSING -> IDLE; on reaching
    /// IDLE the next pending stop (if any) is dispatched. No-op outside the
    /// door phases.
    pub fn door_advance(&mut self, now: u64) -> Emitted {
        match self.mode {
            Mode::DoorsOpening => {
                self.mode = Mode::DoorsOpen;
                self.updated_at = now;
                SmallVec::new()
            }
            Mode::DoorsOpen => {
                self.mode = Mode::DoorsClosing;
                self.updated_at = now;
                SmallVec::new()
            }
            Mode::DoorsClosing => {
                self.mode = Mode::Idle;
                self.updated_at = now;
                self.dispatch_next(now)
            }
            _ => SmallVec::new(),
        }
    }

    /// Take the car out of service from any state.
    ///
    /// Pending stops are kept so a later `resume` can serve them.
    pub fn set_maintenance(&mut self, now: u64) -> DomainEvent {
        self.mode = Mode::Maintenance;
        self.direction = Direction::Idle;
        self.target_floor = None;
        self.emit(EventKind::MaintenanceOn, now)
    }

    /// Return the car to service and dispatch any pending stops.
    pub fn clear_maintenance(&mut self, now: u64) -> Emitted {
        let mut events: Emitted = SmallVec::new();
        if self.mode != Mode::Maintenance {
            return events;
        }
        self.mode = Mode::Idle;
        events.push(self.emit(EventKind::MaintenanceOff, now));
        events.extend(self.dispatch_next(now));
        events
    }

    /// Force the car to a safe idle state after a failed movement job.
    ///
    /// Never leaves a car reporting MOVING with a stale target; pending
    /// stops are kept and will be served on the next call.
    pub fn force_idle(&mut self, reason: &str, now: u64) -> DomainEvent {
        self.mode = Mode::Idle;
        self.direction = Direction::Idle;
        self.target_floor = None;
        self.lease = None;
        self.emit(EventKind::JobFailed { reason: reason.to_string() }, now)
    }

    /// Check the car's structural invariants:
    /// target is set iff MOVING, and direction is UP/DOWN iff MOVING.
    pub fn is_consistent(&self) -> bool {
        let moving = self.mode == Mode::Moving;
        self.target_floor.is_some() == moving && (self.direction != Direction::Idle) == moving
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car_at(floor: i32) -> Car {
        Car::new(CarId::new("car-1"), floor, 1_000)
    }

    #[test]
    fn test_call_enqueues_and_dispatches() {
        let mut car = car_at(0);
        let events = car.call(2, 9, 1_001).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, EventKind::Called { from: 2, to: 9 }));
        assert!(matches!(
            events[1].kind,
            EventKind::MovementStarted { from: 0, to: 2, direction: Direction::Up }
        ));
        assert_eq!(car.mode, Mode::Moving);
        assert_eq!(car.target_floor, Some(2));
        assert_eq!(car.pending_stops, vec![9]);
        assert!(car.is_consistent());
    }

    #[test]
    fn test_call_from_current_floor_skips_to_destination() {
        // The `from` stop equals the car's floor; movement starts straight
        // toward the destination.
        let mut car = car_at(2);
        let events = car.call(2, 9, 1_001).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].kind,
            EventKind::MovementStarted { from: 2, to: 9, direction: Direction::Up }
        ));
        assert_eq!(car.target_floor, Some(9));
        assert!(car.pending_stops.is_empty());
    }

    #[test]
    fn test_call_deduplicates_stops() {
        let mut car = car_at(0);
        car.call(2, 9, 1_001).unwrap();
        // Same floors again while moving: nothing new queued
        car.call(2, 9, 1_002).unwrap();

        assert_eq!(car.pending_stops, vec![9]);
    }

    #[test]
    fn test_call_rejected_in_maintenance() {
        let mut car = car_at(0);
        car.set_maintenance(1_001);

        let err = car.call(2, 9, 1_002).unwrap_err();
        assert_eq!(err, CallError::CarUnavailable(CarId::new("car-1")));
        assert!(car.pending_stops.is_empty());
    }

    #[test]
    fn test_call_while_moving_queues_behind() {
        let mut car = car_at(0);
        car.call(0, 5, 1_001).unwrap();
        assert_eq!(car.target_floor, Some(5));

        // Second call rides along: no new movement, stops appended
        let events = car.call(3, 8, 1_002).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Called { .. }));
        assert_eq!(car.target_floor, Some(5));
        assert_eq!(car.pending_stops, vec![3, 8]);
    }

    #[test]
    fn test_dispatch_next_noop_when_not_idle() {
        let mut car = car_at(0);
        car.call(0, 5, 1_001).unwrap();

        let events = car.dispatch_next(1_002);
        assert!(events.is_empty());
    }

    #[test]
    fn test_advance_one_floor_to_arrival() {
        let mut car = car_at(2);
        car.call(2, 4, 1_001).unwrap();

        assert!(car.advance_one_floor(1_002).is_none());
        assert_eq!(car.current_floor, 3);
        assert_eq!(car.mode, Mode::Moving);

        let arrived = car.advance_one_floor(1_003).unwrap();
        assert!(matches!(arrived.kind, EventKind::Arrived { floor: 4 }));
        assert_eq!(car.mode, Mode::DoorsOpening);
        assert_eq!(car.direction, Direction::Idle);
        assert_eq!(car.target_floor, None);
        assert!(car.is_consistent());
    }

    #[test]
    fn test_advance_moves_down() {
        let mut car = car_at(9);
        car.call(9, 7, 1_001).unwrap();

        car.advance_one_floor(1_002);
        assert_eq!(car.current_floor, 8);
        let arrived = car.advance_one_floor(1_003).unwrap();
        assert!(matches!(arrived.kind, EventKind::Arrived { floor: 7 }));
    }

    #[test]
    fn test_advance_noop_outside_moving() {
        let mut car = car_at(2);
        assert!(car.advance_one_floor(1_001).is_none());
        assert_eq!(car.current_floor, 2);
    }

    #[test]
    fn test_door_cycle_to_idle() {
        let mut car = car_at(2);
        car.call(2, 3, 1_001).unwrap();
        car.advance_one_floor(1_002);
        assert_eq!(car.mode, Mode::DoorsOpening);

        assert!(car.door_advance(1_003).is_empty());
        assert_eq!(car.mode, Mode::DoorsOpen);
        assert!(car.door_advance(1_004).is_empty());
        assert_eq!(car.mode, Mode::DoorsClosing);
        assert!(car.door_advance(1_005).is_empty());
        assert_eq!(car.mode, Mode::Idle);
        assert!(car.is_consistent());
    }

    #[test]
    fn test_door_close_dispatches_next_stop() {
        let mut car = car_at(0);
        car.call(0, 2, 1_001).unwrap();
        // Ride-along call queued behind the active transit
        car.call(5, 7, 1_002).unwrap();

        car.advance_one_floor(1_003);
        car.advance_one_floor(1_004);
        assert_eq!(car.mode, Mode::DoorsOpening);

        car.door_advance(1_005);
        car.door_advance(1_006);
        let events = car.door_advance(1_007);

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].kind,
            EventKind::MovementStarted { from: 2, to: 5, direction: Direction::Up }
        ));
        assert_eq!(car.mode, Mode::Moving);
        assert_eq!(car.pending_stops, vec![7]);
    }

    #[test]
    fn test_maintenance_from_moving_and_resume() {
        let mut car = car_at(0);
        car.call(0, 5, 1_001).unwrap();

        car.set_maintenance(1_002);
        assert_eq!(car.mode, Mode::Maintenance);
        assert_eq!(car.target_floor, None);
        assert_eq!(car.direction, Direction::Idle);

        let events = car.clear_maintenance(1_003);
        assert!(matches!(events[0].kind, EventKind::MaintenanceOff));
        // Pending stop 5 survives maintenance and is redispatched
        assert!(matches!(events[1].kind, EventKind::MovementStarted { to: 5, .. }));
        assert_eq!(car.mode, Mode::Moving);
    }

    #[test]
    fn test_clear_maintenance_noop_when_not_in_maintenance() {
        let mut car = car_at(0);
        assert!(car.clear_maintenance(1_001).is_empty());
        assert_eq!(car.mode, Mode::Idle);
    }

    #[test]
    fn test_force_idle_is_safe() {
        let mut car = car_at(0);
        car.call(0, 5, 1_001).unwrap();
        car.advance_one_floor(1_002);
        car.lease = Some(Lease::new("w", 1_002, 30_000));

        let event = car.force_idle("store write failed", 1_003);

        assert!(matches!(event.kind, EventKind::JobFailed { .. }));
        assert_eq!(car.mode, Mode::Idle);
        assert_eq!(car.direction, Direction::Idle);
        assert_eq!(car.target_floor, None);
        assert!(car.lease.is_none());
        assert!(car.is_consistent());
    }

    #[test]
    fn test_seq_is_monotonic() {
        let mut car = car_at(0);
        let mut last = 0;
        for event in car.call(0, 3, 1_001).unwrap() {
            assert!(event.seq > last);
            last = event.seq;
        }
        car.advance_one_floor(1_002);
        car.advance_one_floor(1_003);
        let arrived = car.advance_one_floor(1_004).unwrap();
        assert!(arrived.seq > last);
        assert_eq!(car.seq, arrived.seq);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut car = car_at(4);
        car.call(4, 8, 1_001).unwrap();
        car.lease = Some(Lease::new("owner-1", 1_001, 30_000));

        let json = serde_json::to_string(&car).unwrap();
        let back: Car = serde_json::from_str(&json).unwrap();
        assert_eq!(back, car);
    }
}
