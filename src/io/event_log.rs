//! Durable, strictly ordered event log
//!
//! Domain events are appended per car in sequence order and never mutated.
//! Appends are idempotent on `(car, seq)` so a retried movement step cannot
//! duplicate its events. The JSONL implementation writes one JSON object
//! per line for audit/replay tooling downstream.

use crate::domain::event::DomainEvent;
use crate::domain::types::CarId;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("transient log failure: {0}")]
    Transient(String),
    #[error("log io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Event log contract: ordered append, queryable by car and time range.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &DomainEvent) -> Result<(), LogError>;
    /// Events ordered by seq, optionally filtered by car and
    /// `[from_ts, to_ts]` (epoch ms, inclusive).
    async fn query(
        &self,
        car: Option<&CarId>,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<DomainEvent>, LogError>;
}

/// Shared in-memory index: events per car, deduplicated on seq
#[derive(Default)]
struct LogIndex {
    by_car: FxHashMap<CarId, Vec<DomainEvent>>,
}

impl LogIndex {
    /// Returns false when the event was already appended (same car+seq)
    fn insert(&mut self, event: &DomainEvent) -> bool {
        let events = self.by_car.entry(event.car.clone()).or_default();
        if events.last().map(|e| e.seq >= event.seq).unwrap_or(false) {
            return false;
        }
        events.push(event.clone());
        true
    }

    fn query(&self, car: Option<&CarId>, range: Option<(u64, u64)>) -> Vec<DomainEvent> {
        let in_range = |e: &DomainEvent| match range {
            Some((from, to)) => e.ts >= from && e.ts <= to,
            None => true,
        };

        match car {
            Some(id) => self
                .by_car
                .get(id)
                .map(|events| events.iter().filter(|e| in_range(e)).cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<DomainEvent> = self
                    .by_car
                    .values()
                    .flat_map(|events| events.iter().filter(|e| in_range(e)).cloned())
                    .collect();
                all.sort_by(|a, b| (a.ts, &a.car, a.seq).cmp(&(b.ts, &b.car, b.seq)));
                all
            }
        }
    }
}

/// Purely in-memory log (tests and embedded use)
#[derive(Default)]
pub struct MemoryEventLog {
    index: RwLock<LogIndex>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &DomainEvent) -> Result<(), LogError> {
        if !self.index.write().insert(event) {
            debug!(car = %event.car, seq = %event.seq, "event_append_duplicate");
        }
        Ok(())
    }

    async fn query(
        &self,
        car: Option<&CarId>,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<DomainEvent>, LogError> {
        Ok(self.index.read().query(car, range))
    }
}

/// File-backed log: JSONL append plus the in-memory index for queries.
///
/// Existing lines are reloaded on startup so queries cover events from
/// before a restart.
pub struct JsonlEventLog {
    file_path: PathBuf,
    index: RwLock<LogIndex>,
}

impl JsonlEventLog {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let mut index = LogIndex::default();

        let mut reloaded = 0usize;
        if let Ok(content) = std::fs::read_to_string(&file_path) {
            for line in content.lines() {
                match serde_json::from_str::<DomainEvent>(line) {
                    Ok(event) => {
                        if index.insert(&event) {
                            reloaded += 1;
                        }
                    }
                    Err(e) => warn!(error = %e, "event_log_reload_bad_line"),
                }
            }
        }

        info!(file = %file_path.display(), reloaded = %reloaded, "event_log_initialized");
        Self { file_path, index: RwLock::new(index) }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: &DomainEvent) -> Result<(), LogError> {
        if !self.index.write().insert(event) {
            debug!(car = %event.car, seq = %event.seq, "event_append_duplicate");
            return Ok(());
        }

        let line = serde_json::to_string(event)
            .map_err(|e| LogError::Transient(format!("event serialization: {e}")))?;
        self.append_line(&line)?;
        debug!(car = %event.car, seq = %event.seq, kind = %event.kind.as_str(), "event_appended");
        Ok(())
    }

    async fn query(
        &self,
        car: Option<&CarId>,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<DomainEvent>, LogError> {
        Ok(self.index.read().query(car, range))
    }
}
