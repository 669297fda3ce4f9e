//! In-process job queue for movement work
//!
//! Delivers jobs to scheduler workers with per-job isolation and delayed
//! execution. The queue itself knows nothing about elevators beyond the
//! car id used for the atomic claim at dequeue time; supersession policy
//! lives in the scheduler.

use crate::domain::types::{CarId, Direction, Mode};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub type JobId = u64;

/// A unit of scheduler work
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Drive one transit from `from` to `to`
    Transit { car: CarId, from: i32, to: i32, direction: Direction },
    /// Advance the door cycle; dropped if the car is no longer in
    /// `expected` (a crashed or superseded predecessor)
    DoorPhase { car: CarId, expected: Mode },
}

impl Job {
    pub fn car(&self) -> &CarId {
        match self {
            Job::Transit { car, .. } => car,
            Job::DoorPhase { car, .. } => car,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Transit { .. } => "transit",
            Job::DoorPhase { .. } => "door_phase",
        }
    }
}

/// Lifecycle of a job. `Superseded` is only reachable from `Queued`;
/// a running job is always allowed to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Superseded,
}

/// Options attached at enqueue time; the retry budget rides on the job
/// and parameterizes its step retries.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOpts {
    /// Earliest-start delay
    pub delay: Duration,
    /// Step retry attempts before the job fails
    pub attempts: u32,
    /// Base delay for exponential step backoff
    pub backoff_base: Duration,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self { delay: Duration::ZERO, attempts: 3, backoff_base: Duration::from_secs(2) }
    }
}

/// A job handed to a worker
#[derive(Debug)]
pub struct Dequeued {
    pub id: JobId,
    pub job: Job,
    pub opts: EnqueueOpts,
}

struct Waiting {
    id: JobId,
    job: Job,
    run_at: Instant,
    opts: EnqueueOpts,
}

pub struct JobQueue {
    waiting: Mutex<VecDeque<Waiting>>,
    states: Mutex<FxHashMap<JobId, JobState>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(VecDeque::new()),
            states: Mutex::new(FxHashMap::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue a job for execution no earlier than `opts.delay` from now
    pub fn enqueue(&self, job: Job, opts: EnqueueOpts) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let run_at = Instant::now() + opts.delay;

        self.states.lock().insert(id, JobState::Queued);
        self.waiting.lock().push_back(Waiting { id, job, run_at, opts });
        self.notify.notify_waiters();
        id
    }

    /// Remove all waiting jobs matching the predicate, marking them
    /// superseded. Running jobs are untouched.
    pub fn cancel_if_waiting(&self, pred: impl Fn(&Job) -> bool) -> usize {
        let mut waiting = self.waiting.lock();
        let mut states = self.states.lock();
        let before = waiting.len();

        waiting.retain(|w| {
            if pred(&w.job) {
                states.insert(w.id, JobState::Superseded);
                false
            } else {
                true
            }
        });

        before - waiting.len()
    }

    /// Wait for the next runnable job. `claim` must atomically claim the
    /// job's car and return whether the claim succeeded; jobs whose claim
    /// fails stay queued until `poke` is called.
    pub async fn dequeue(&self, claim: impl Fn(&Job) -> bool) -> Dequeued {
        loop {
            // Register for wakeups before scanning so an enqueue between
            // the scan and the await is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let (picked, next_wakeup) = {
                let mut waiting = self.waiting.lock();
                let now = Instant::now();
                let mut picked_idx = None;
                let mut next_wakeup: Option<Instant> = None;

                for (i, w) in waiting.iter().enumerate() {
                    if w.run_at > now {
                        next_wakeup = Some(next_wakeup.map_or(w.run_at, |t| t.min(w.run_at)));
                        continue;
                    }
                    if claim(&w.job) {
                        picked_idx = Some(i);
                        break;
                    }
                }

                (picked_idx.and_then(|i| waiting.remove(i)), next_wakeup)
            };

            if let Some(w) = picked {
                self.states.lock().insert(w.id, JobState::Running);
                return Dequeued { id: w.id, job: w.job, opts: w.opts };
            }

            match next_wakeup {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wake workers to re-scan, e.g. after a car was released
    pub fn poke(&self) {
        self.notify.notify_waiters();
    }

    pub fn mark_completed(&self, id: JobId) {
        self.states.lock().insert(id, JobState::Completed);
    }

    pub fn mark_failed(&self, id: JobId) {
        self.states.lock().insert(id, JobState::Failed);
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.states.lock().get(&id).copied()
    }

    /// Number of jobs waiting to start
    pub fn waiting_len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// All known job states (trace for diagnostics and tests)
    pub fn states_snapshot(&self) -> Vec<(JobId, JobState)> {
        let mut states: Vec<(JobId, JobState)> =
            self.states.lock().iter().map(|(id, s)| (*id, *s)).collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
