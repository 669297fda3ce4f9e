//! Lock-free metrics collection
//!
//! Counters are plain relaxed atomics; the hot paths (movement steps,
//! notifications) only ever increment. A periodic reporter task pulls a
//! summary for logging and for the MQTT metrics topic.

use crate::io::notify::MetricsPayload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct Metrics {
    calls_total: AtomicU64,
    calls_rejected: AtomicU64,
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_superseded: AtomicU64,
    steps_total: AtomicU64,
    step_retries: AtomicU64,
    door_cycles: AtomicU64,
    cars_provisioned: AtomicU64,
    started: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            calls_total: AtomicU64::new(0),
            calls_rejected: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_superseded: AtomicU64::new(0),
            steps_total: AtomicU64::new(0),
            step_retries: AtomicU64::new(0),
            door_cycles: AtomicU64::new(0),
            cars_provisioned: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn record_call(&self) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_call_rejected(&self) {
        self.calls_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_jobs_superseded(&self, count: u64) {
        self.jobs_superseded.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_step(&self) {
        self.steps_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_step_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_door_cycle(&self) {
        self.door_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_car_provisioned(&self) {
        self.cars_provisioned.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started.elapsed().as_secs(),
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_rejected: self.calls_rejected.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_superseded: self.jobs_superseded.load(Ordering::Relaxed),
            steps_total: self.steps_total.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            door_cycles: self.door_cycles.load(Ordering::Relaxed),
            cars_provisioned: self.cars_provisioned.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub calls_total: u64,
    pub calls_rejected: u64,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_superseded: u64,
    pub steps_total: u64,
    pub step_retries: u64,
    pub door_cycles: u64,
    pub cars_provisioned: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured line
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            calls_total = %self.calls_total,
            calls_rejected = %self.calls_rejected,
            jobs_started = %self.jobs_started,
            jobs_completed = %self.jobs_completed,
            jobs_failed = %self.jobs_failed,
            jobs_superseded = %self.jobs_superseded,
            steps_total = %self.steps_total,
            step_retries = %self.step_retries,
            door_cycles = %self.door_cycles,
            cars_provisioned = %self.cars_provisioned,
            "metrics_summary"
        );
    }

    /// Convert to the MQTT metrics payload (site/ts filled by the sender)
    pub fn to_payload(&self) -> MetricsPayload {
        MetricsPayload {
            site: String::new(),
            ts: 0,
            calls_total: self.calls_total,
            calls_rejected: self.calls_rejected,
            jobs_started: self.jobs_started,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
            jobs_superseded: self.jobs_superseded,
            steps_total: self.steps_total,
            step_retries: self.step_retries,
            door_cycles: self.door_cycles,
            cars_provisioned: self.cars_provisioned,
        }
    }
}
