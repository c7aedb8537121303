//! Shared health state for the /health endpoint.
//! Updated by the tracker around every batch.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    /// True while a batch is in flight.
    pub running: AtomicBool,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    /// Unix seconds when the last batch finished (0 = never).
    pub last_run_at: AtomicI64,
    pub last_batch_size: AtomicU64,
    /// History appends or snapshot writes that failed, across all runs.
    pub persistence_warnings: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub running: bool,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run_at: Option<i64>,
    pub last_batch_size: u64,
    pub persistence_warnings: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_started(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn batch_finished(&self, size: usize, persistence_warnings: usize, finished_at: i64) {
        self.running.store(false, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.last_run_at.store(finished_at, Ordering::Relaxed);
        self.last_batch_size.store(size as u64, Ordering::Relaxed);
        self.persistence_warnings
            .fetch_add(persistence_warnings as u64, Ordering::Relaxed);
    }

    pub fn batch_failed(&self, persistence: bool) {
        self.running.store(false, Ordering::Relaxed);
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        if persistence {
            self.persistence_warnings.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_run_at.load(Ordering::Relaxed);
        let warnings = self.persistence_warnings.load(Ordering::Relaxed);
        HealthSnapshot {
            status: if warnings == 0 { "ok" } else { "degraded" },
            running: self.running.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            last_run_at: (last > 0).then_some(last),
            last_batch_size: self.last_batch_size.load(Ordering::Relaxed),
            persistence_warnings: warnings,
        }
    }
}
