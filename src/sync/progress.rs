use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::{RunStatus, SyncProgress, SyncReport};

/// Point-in-time view of the engine for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub is_running: bool,
    pub percent: u8,
    pub completed_batches: usize,
    pub total_batches: usize,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Terminal status of the most recent finished run.
    pub last_run: Option<RunStatus>,
}

#[derive(Debug, Default)]
struct State {
    status: RunStatus,
    completed_batches: usize,
    total_batches: usize,
    last_success_at: Option<DateTime<Utc>>,
    last_run: Option<RunStatus>,
}

impl State {
    fn percent(&self) -> u8 {
        percent_of(self.completed_batches, self.total_batches)
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status,
            is_running: self.status.is_active(),
            percent: self.percent(),
            completed_batches: self.completed_batches,
            total_batches: self.total_batches,
            last_success_at: self.last_success_at,
            last_run: self.last_run,
        }
    }
}

/// Floor of `completed / total * 100`, or 0 when there are no batches.
pub fn percent_of(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (completed.min(total) * 100 / total) as u8
}

/// Tracks run progress and the last successful run, and forwards every
/// change to the registered observer. Observational only.
#[derive(Clone)]
pub struct ProgressReporter {
    state: Arc<Mutex<State>>,
    observer: Arc<dyn SyncProgress>,
}

impl ProgressReporter {
    pub fn new(observer: Arc<dyn SyncProgress>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            observer,
        }
    }

    /// Seed the last-success time, e.g. from a persisted run history.
    pub fn with_last_success(self, at: Option<DateTime<Utc>>) -> Self {
        self.lock().last_success_at = at;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress_percent(&self) -> u8 {
        self.lock().percent()
    }

    pub fn last_successful_run_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_success_at
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot()
    }

    /// Move to a new status. Entering Building resets the batch counters.
    pub fn set_status(&self, status: RunStatus) {
        let snapshot = {
            let mut state = self.lock();
            if status == RunStatus::Building {
                state.completed_batches = 0;
                state.total_batches = 0;
            }
            state.status = status;
            state.snapshot()
        };
        self.observer.on_status(&snapshot);
    }

    pub fn on_run_start(&self, total_items: usize, total_batches: usize) {
        let snapshot = {
            let mut state = self.lock();
            state.status = RunStatus::Running;
            state.completed_batches = 0;
            state.total_batches = total_batches;
            state.snapshot()
        };
        self.observer.on_status(&snapshot);
        self.observer.on_run_start(total_items, total_batches);
    }

    /// Called after each batch reaches a terminal result. `completed` counts
    /// only batches that succeeded.
    pub fn on_progress(&self, completed: usize, total: usize) {
        let snapshot = {
            let mut state = self.lock();
            state.completed_batches = completed;
            state.total_batches = total;
            state.snapshot()
        };
        self.observer.on_progress(&snapshot);
    }

    /// Record the run's terminal status and hand the report to the observer.
    pub fn on_run_complete(&self, report: &SyncReport) {
        let snapshot = {
            let mut state = self.lock();
            state.status = report.status;
            state.last_run = Some(report.status);
            if report.status == RunStatus::Succeeded {
                state.last_success_at = Some(report.finished_at);
            }
            state.snapshot()
        };
        self.observer.on_status(&snapshot);
        self.observer.on_run_complete(report);
    }
}
