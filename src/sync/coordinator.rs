//! Decides when a sync run starts and drives it to a terminal status.
//!
//! Runs are single-flight: a run holds the slot from the moment it is
//! triggered (before the queue is built) until its run guard is dropped,
//! which also happens if the run task panics or its future is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::sync::batch::partition;
use crate::sync::config::SyncConfig;
use crate::sync::connectivity::ConnectivityProvider;
use crate::sync::progress::ProgressReporter;
use crate::sync::queue::QueueBuilder;
use crate::sync::retry::{RetryExecutor, RetryPolicy};
use crate::sync::{RunStatus, SyncProgress, SyncReport};

/// Entry point the rest of the application talks to.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: SyncConfig,
    queue: QueueBuilder,
    executor: RetryExecutor,
    policy: RetryPolicy,
    reporter: ProgressReporter,
    running: AtomicBool,
    /// Cancel flag of the run holding the slot. Set and cleared together
    /// with `running`, under this lock.
    active_cancel: Mutex<Option<Arc<AtomicBool>>>,
    /// Mirrors `running` for tasks that wait for the slot to be released.
    active: watch::Sender<bool>,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

/// Holds the single-flight slot. Dropping it returns the coordinator to Idle.
struct RunGuard {
    inner: Arc<Inner>,
    cancel: Arc<AtomicBool>,
}

impl RunGuard {
    fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.reporter.set_status(RunStatus::Idle);
        {
            let mut slot = self
                .inner
                .active_cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = None;
            self.inner.running.store(false, Ordering::Release);
        }
        self.inner.active.send_replace(false);
    }
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        queue: QueueBuilder,
        observer: Arc<dyn SyncProgress>,
    ) -> Result<Self> {
        Self::with_reporter(config, queue, ProgressReporter::new(observer))
    }

    pub fn with_reporter(
        config: SyncConfig,
        queue: QueueBuilder,
        reporter: ProgressReporter,
    ) -> Result<Self> {
        config.validate()?;
        if queue.adapters().is_empty() {
            log::warn!("Sync coordinator created without source adapters");
        }
        let executor = RetryExecutor::new(queue.adapter_map());
        let policy = RetryPolicy::from(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue,
                executor,
                policy,
                reporter,
                running: AtomicBool::new(false),
                active_cancel: Mutex::new(None),
                active: watch::channel(false).0,
                debounce: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.inner.reporter
    }

    pub fn status(&self) -> RunStatus {
        self.inner.reporter.status()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.pending_count().await
    }

    /// Manual trigger. Starts a run in the background and returns `true`, or
    /// returns `false` without doing anything if a run is already active.
    /// Must be called from within a tokio runtime.
    pub fn request_sync(&self) -> bool {
        match self.inner.try_acquire() {
            Some(guard) => {
                tokio::spawn(Arc::clone(&self.inner).execute(guard));
                true
            }
            None => {
                log::info!("Sync already in progress; manual trigger ignored");
                false
            }
        }
    }

    /// Manual trigger that waits for the run. `None` if a run is already active.
    pub async fn run_now(&self) -> Option<SyncReport> {
        let guard = self.inner.try_acquire()?;
        Some(Arc::clone(&self.inner).execute(guard).await)
    }

    /// Ask the active run to stop before its next batch. Returns `false` when
    /// nothing is running. An accepted cancel always ends that run as
    /// Cancelled unless it has already passed its last batch.
    pub fn cancel_current(&self) -> bool {
        let slot = self
            .inner
            .active_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Wait until no run holds the slot. Returns at once when idle.
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = active.wait_for(|active| !*active).await;
    }

    /// Spawn the reconnect and periodic triggers.
    pub fn start(&self, connectivity: Arc<dyn ConnectivityProvider>) -> TriggerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Subscribe before spawning so a transition published right after
        // `start` returns is still seen as one.
        let mut network = connectivity.subscribe();
        let online = *network.borrow_and_update();
        let task = tokio::spawn(trigger_loop(
            Arc::clone(&self.inner),
            connectivity,
            network,
            online,
            shutdown_rx,
        ));
        TriggerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Owns the background trigger task started by [`SyncCoordinator::start`].
/// Dropping the handle also stops the triggers.
pub struct TriggerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    /// Stop the triggers and wait for the loop to exit. An active run is left
    /// to finish on its own.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            log::warn!("Trigger loop ended abnormally: {e}");
        }
    }
}

impl Inner {
    fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        let mut slot = self
            .active_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let cancel = Arc::new(AtomicBool::new(false));
        *slot = Some(Arc::clone(&cancel));
        drop(slot);
        self.active.send_replace(true);
        Some(RunGuard {
            inner: Arc::clone(self),
            cancel,
        })
    }

    /// Shared guard of the reconnect and periodic triggers: start a run only
    /// when idle and something is pending.
    async fn trigger_if_pending(self: &Arc<Self>, trigger: &str) -> bool {
        if self.running.load(Ordering::Acquire) {
            log::debug!("{trigger} trigger skipped: sync in progress");
            return false;
        }
        let pending = self.queue.pending_count().await;
        if pending == 0 {
            log::debug!("{trigger} trigger skipped: nothing pending");
            return false;
        }
        match self.try_acquire() {
            Some(guard) => {
                log::info!("{trigger} trigger: starting sync of {pending} pending items");
                tokio::spawn(Arc::clone(self).execute(guard));
                true
            }
            None => false,
        }
    }

    /// Cancel any pending reconnect run and schedule a new one after the
    /// debounce delay.
    fn schedule_reconnect(self: &Arc<Self>, connectivity: Arc<dyn ConnectivityProvider>) {
        let inner = Arc::clone(self);
        let delay = self.config.reconnect_debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if connectivity.is_online() {
                inner.trigger_if_pending("reconnect").await;
            }
        });
        let previous = self
            .debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        let pending = self
            .debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = pending {
            task.abort();
        }
    }

    /// Build, partition and push. Batches run strictly in order; the first
    /// batch that exhausts its retries ends the run.
    async fn execute(self: Arc<Self>, guard: RunGuard) -> SyncReport {
        let started_at = Utc::now();
        self.reporter.set_status(RunStatus::Building);

        let queue = self.queue.build().await;
        if queue.is_empty() {
            log::debug!("Nothing pending; sync run ends without batches");
            drop(guard);
            return SyncReport::empty(started_at);
        }

        let items_total = queue.len();
        let batches = match partition(queue, self.config.batch_size) {
            Ok(batches) => batches,
            Err(e) => {
                let report = failed_report(started_at, items_total, 0, 0, 0, &e);
                self.reporter.on_run_complete(&report);
                return report;
            }
        };
        let total = batches.len();
        log::info!("Sync run: {items_total} items in {total} batches");
        self.reporter.on_run_start(items_total, total);

        let mut completed = 0;
        let mut items_synced = 0;
        let mut failure: Option<(RunStatus, Error)> = None;

        for batch in &batches {
            if guard.cancel_requested() {
                failure = Some((RunStatus::Cancelled, Error::Cancelled { completed, total }));
                break;
            }
            match self.executor.run_batch(batch, &self.policy).await {
                Ok(_) => {
                    completed += 1;
                    items_synced += batch.len();
                    self.reporter.on_progress(completed, total);
                }
                Err(e) => {
                    self.reporter.on_progress(completed, total);
                    let err = Error::RunFailed {
                        batch: batch.index + 1,
                        total,
                        message: e.to_string(),
                    };
                    failure = Some((RunStatus::Failed, err));
                    break;
                }
            }
        }

        let report = match failure {
            None => SyncReport {
                status: RunStatus::Succeeded,
                items_total,
                items_synced,
                batches_completed: completed,
                batches_total: total,
                started_at,
                finished_at: Utc::now(),
                error: None,
            },
            Some((status, err)) => {
                log::error!("{err}");
                let mut report =
                    failed_report(started_at, items_total, items_synced, completed, total, &err);
                report.status = status;
                report
            }
        };
        self.reporter.on_run_complete(&report);
        drop(guard);
        report
    }
}

fn failed_report(
    started_at: chrono::DateTime<Utc>,
    items_total: usize,
    items_synced: usize,
    batches_completed: usize,
    batches_total: usize,
    err: &Error,
) -> SyncReport {
    SyncReport {
        status: RunStatus::Failed,
        items_total,
        items_synced,
        batches_completed,
        batches_total,
        started_at,
        finished_at: Utc::now(),
        error: Some(err.to_string()),
    }
}

async fn trigger_loop(
    inner: Arc<Inner>,
    connectivity: Arc<dyn ConnectivityProvider>,
    mut network: watch::Receiver<bool>,
    mut online: bool,
    mut shutdown: oneshot::Receiver<()>,
) {
    let period = inner.config.periodic_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = network.changed() => {
                if changed.is_err() {
                    log::debug!("Connectivity provider closed; stopping triggers");
                    break;
                }
                let now_online = *network.borrow_and_update();
                if now_online && !online {
                    if inner.running.load(Ordering::Acquire) {
                        log::debug!("Back online during an active sync; no reconnect run");
                    } else if inner.queue.pending_count().await > 0 {
                        log::info!("Back online; syncing in {}ms", inner.config.reconnect_debounce.as_millis());
                        inner.schedule_reconnect(Arc::clone(&connectivity));
                    }
                } else if !now_online {
                    inner.cancel_reconnect();
                }
                online = now_online;
            }
            _ = ticker.tick() => {
                if online {
                    inner.trigger_if_pending("periodic").await;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    inner.cancel_reconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::sync::connectivity::ManualConnectivity;
    use crate::sync::item::{PendingRecord, SourceType};
    use crate::sync::progress::ProgressSnapshot;
    use crate::sync::testing::{assert_millis, ts, MockAdapter};
    use crate::sync::NoopProgress;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<RunStatus>>,
        percents: Mutex<Vec<u8>>,
        reports: Mutex<Vec<SyncReport>>,
        starts: AtomicUsize,
    }

    impl Recorder {
        fn reports(&self) -> Vec<SyncReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl SyncProgress for Recorder {
        fn on_status(&self, snapshot: &ProgressSnapshot) {
            self.statuses.lock().unwrap().push(snapshot.status);
        }

        fn on_run_start(&self, _total_items: usize, _total_batches: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, snapshot: &ProgressSnapshot) {
            self.percents.lock().unwrap().push(snapshot.percent);
        }

        fn on_run_complete(&self, report: &SyncReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    struct Fixture {
        shifts: Arc<MockAdapter>,
        vehicles: Arc<MockAdapter>,
        calcs: Arc<MockAdapter>,
        recorder: Arc<Recorder>,
        coordinator: SyncCoordinator,
    }

    /// 2 shifts, 1 vehicle, 4 calculations, batches of 3.
    fn fixture(
        shifts: MockAdapter,
        vehicles: MockAdapter,
        calcs: MockAdapter,
        config: SyncConfig,
    ) -> Fixture {
        let shifts = shifts.into_arc();
        let vehicles = vehicles.into_arc();
        let calcs = calcs.into_arc();
        let queue = QueueBuilder::new()
            .with_adapter(shifts.clone())
            .unwrap()
            .with_adapter(vehicles.clone())
            .unwrap()
            .with_adapter(calcs.clone())
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let coordinator = SyncCoordinator::new(config, queue, recorder.clone()).unwrap();
        Fixture {
            shifts,
            vehicles,
            calcs,
            recorder,
            coordinator,
        }
    }

    fn standard() -> (MockAdapter, MockAdapter, MockAdapter) {
        (
            MockAdapter::with_count(SourceType::Shift, "s", 2),
            MockAdapter::with_count(SourceType::Vehicle, "v", 1),
            MockAdapter::with_count(SourceType::Calculation, "c", 4),
        )
    }

    fn config() -> SyncConfig {
        SyncConfig::default().batch_size(3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_batches_succeed() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());

        let report = f.coordinator.run_now().await.unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.items_total, 7);
        assert_eq!(report.items_synced, 7);
        assert_eq!(report.batches_completed, 3);
        assert_eq!(report.batches_total, 3);
        assert_eq!(*f.recorder.percents.lock().unwrap(), vec![33, 66, 100]);
        // [s, s, v] [c, c, c] [c]
        assert_eq!(f.shifts.push_count(), 1);
        assert_eq!(f.vehicles.push_count(), 1);
        assert_eq!(f.calcs.push_count(), 2);
        assert_eq!(f.coordinator.status(), RunStatus::Idle);
        assert_eq!(
            f.coordinator.reporter().last_successful_run_at(),
            Some(report.finished_at)
        );
        assert_eq!(f.recorder.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_first_batch_aborts_run() {
        let (s, v, c) = standard();
        let f = fixture(s, v.failing(), c, config());

        let started = Instant::now();
        let report = f.coordinator.run_now().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.batches_completed, 0);
        assert!(report.error.as_deref().unwrap().contains("batch 1/3"));
        assert_eq!(f.vehicles.push_count(), 3);
        assert_eq!(f.shifts.push_count(), 3);
        assert_eq!(f.calcs.push_count(), 0);
        let gaps = f.vehicles.push_gaps();
        assert_millis(gaps[0], 1000);
        assert_millis(gaps[1], 2000);
        assert_millis(elapsed - gaps[0] - gaps[1], 3000);
        assert_eq!(f.coordinator.reporter().progress_percent(), 0);
        assert_eq!(*f.recorder.percents.lock().unwrap(), vec![0]);
        assert_eq!(f.coordinator.reporter().last_successful_run_at(), None);
        assert_eq!(f.coordinator.reporter().snapshot().last_run, Some(RunStatus::Failed));

        // The slot is free again and the whole queue is retried next time
        assert!(!f.coordinator.is_running());
        f.vehicles.set_always_fail(false);
        let retry = f.coordinator.run_now().await.unwrap();
        assert_eq!(retry.status, RunStatus::Succeeded);
        assert_eq!(retry.items_synced, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_batch_failure_keeps_earlier_progress() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c.failing_first(3), config());

        let report = f.coordinator.run_now().await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.batches_completed, 1);
        assert_eq!(report.items_synced, 3);
        assert_eq!(*f.recorder.percents.lock().unwrap(), vec![33, 33]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_pending_runs_no_batches() {
        let f = fixture(
            MockAdapter::new(SourceType::Shift, vec![]),
            MockAdapter::new(SourceType::Vehicle, vec![]),
            MockAdapter::new(SourceType::Calculation, vec![]),
            config(),
        );

        let report = f.coordinator.run_now().await.unwrap();

        assert_eq!(report.items_total, 0);
        assert_eq!(report.batches_total, 0);
        assert_eq!(f.recorder.starts.load(Ordering::SeqCst), 0);
        assert!(f.recorder.reports().is_empty());
        assert_eq!(f.shifts.push_count() + f.vehicles.push_count() + f.calcs.push_count(), 0);
        assert_eq!(f.coordinator.status(), RunStatus::Idle);
        assert!(!f.coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_is_single_flight() {
        let (s, v, c) = standard();
        let f = fixture(s.slow(Duration::from_secs(10)), v, c, config());

        assert!(f.coordinator.request_sync());
        assert!(!f.coordinator.request_sync());
        assert!(f.coordinator.run_now().await.is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.coordinator.is_running());
        assert!(!f.coordinator.request_sync());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!f.coordinator.is_running());
        assert_eq!(f.recorder.starts.load(Ordering::SeqCst), 1);
        assert_eq!(f.shifts.push_count(), 1);

        let statuses = f.recorder.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![
                RunStatus::Building,
                RunStatus::Running,
                RunStatus::Succeeded,
                RunStatus::Idle
            ]
        );

        assert!(f.coordinator.request_sync());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_between_batches() {
        let (s, v, c) = standard();
        let f = fixture(s.slow(Duration::from_secs(10)), v, c, config());

        assert!(!f.coordinator.cancel_current());
        assert!(f.coordinator.request_sync());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.coordinator.cancel_current());
        tokio::time::sleep(Duration::from_secs(10)).await;

        let reports = f.recorder.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Cancelled);
        assert_eq!(reports[0].batches_completed, 1);
        assert_eq!(f.calcs.push_count(), 0);
        assert!(!f.coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_right_after_trigger_is_honoured() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());

        assert!(f.coordinator.request_sync());
        assert!(f.coordinator.cancel_current());
        f.coordinator.wait_idle().await;

        let reports = f.recorder.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, RunStatus::Cancelled);
        assert_eq!(reports[0].batches_completed, 0);
        assert_eq!(f.shifts.push_count() + f.vehicles.push_count(), 0);

        // The cancel belonged to that run only
        let next = f.coordinator.run_now().await.unwrap();
        assert_eq!(next.status, RunStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_returns_when_run_ends() {
        let (s, v, c) = standard();
        let f = fixture(s.slow(Duration::from_secs(10)), v, c, config());

        f.coordinator.wait_idle().await;
        assert!(f.coordinator.request_sync());

        let started = Instant::now();
        f.coordinator.wait_idle().await;
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(!f.coordinator.is_running());
        assert_eq!(f.recorder.reports().len(), 1);
        assert!(!f.coordinator.cancel_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_debounced() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());
        let network = Arc::new(ManualConnectivity::new(false));
        let handle = f.coordinator.start(network.clone());

        network.set_online(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(f.shifts.push_count(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(f.shifts.push_count(), 1);
        assert_eq!(f.recorder.reports().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_reconnect_reschedules() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());
        let network = Arc::new(ManualConnectivity::new(false));
        let handle = f.coordinator.start(network.clone());

        network.set_online(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        network.set_online(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        network.set_online(true);
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(f.shifts.push_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.shifts.push_count(), 1);
        assert_eq!(f.recorder.reports().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_with_nothing_pending_does_not_run() {
        let f = fixture(
            MockAdapter::new(SourceType::Shift, vec![]),
            MockAdapter::new(SourceType::Vehicle, vec![]),
            MockAdapter::new(SourceType::Calculation, vec![]),
            config(),
        );
        let network = Arc::new(ManualConnectivity::new(false));
        let handle = f.coordinator.start(network.clone());

        network.set_online(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.recorder.statuses.lock().unwrap().len(), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_while_online() {
        let f = fixture(
            MockAdapter::with_count(SourceType::Shift, "s", 1).clearing(),
            MockAdapter::new(SourceType::Vehicle, vec![]),
            MockAdapter::new(SourceType::Calculation, vec![]),
            config(),
        );
        let network = Arc::new(ManualConnectivity::new(true));
        let handle = f.coordinator.start(network.clone());

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(f.shifts.push_count(), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(f.shifts.push_count(), 1);

        // Cleared by the push, so the next sweep finds nothing
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.shifts.push_count(), 1);

        f.shifts.add_record(PendingRecord::new("late").captured_at(ts(18, 0)));
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(f.shifts.push_count(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_periodic_sweep_while_offline() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());
        let network = Arc::new(ManualConnectivity::new(false));
        let handle = f.coordinator.start(network.clone());

        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(f.shifts.push_count(), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_triggers() {
        let (s, v, c) = standard();
        let f = fixture(s, v, c, config());
        let network = Arc::new(ManualConnectivity::new(true));
        let handle = f.coordinator.start(network.clone());

        handle.shutdown().await;
        network.set_online(false);
        network.set_online(true);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(f.shifts.push_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SyncCoordinator::new(
            SyncConfig::default().batch_size(0),
            QueueBuilder::new(),
            Arc::new(NoopProgress),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }
}
