//! Background expiry sweep.
//!
//! # Architecture
//!
//! The cleaner:
//! 1. Waits `initial_delay`, then fires every `cleanup_interval`
//! 2. Runs one sweep per tick against its target (the registry)
//! 3. Survives sweep failures and panics; the next tick still fires
//! 4. Stops on a `watch` shutdown signal, letting an in-flight sweep finish
//!    within `shutdown_timeout` before aborting it
//!
//! The task only holds a `Weak` reference to its target, so dropping the
//! registry ends the task at the next tick.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registrations examined
    pub evaluated: usize,
    /// Registrations removed because their lease ran out
    pub expired: usize,
    /// Registrations (or whole snapshots) that could not be evaluated
    pub failures: usize,
}

impl SweepReport {
    /// Report for a sweep that could not run at all
    pub fn failed() -> Self {
        Self {
            failures: 1,
            ..Default::default()
        }
    }
}

/// Something the cleaner can sweep
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    /// Scan all registrations once and expire the dead ones
    async fn sweep(&self) -> SweepReport;
}

/// Lifecycle state of the cleaner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanerStatus {
    /// No task running
    Stopped,
    /// Task scheduled
    Running,
    /// Shutdown signalled, waiting for the task
    Stopping,
}

struct CleanerState {
    status: CleanerStatus,
    task: Option<JoinHandle<()>>,
    last_report: Option<SweepReport>,
}

impl CleanerState {
    fn validate(&self) -> Result<(), String> {
        if self.status == CleanerStatus::Running && self.task.is_none() {
            return Err("cleaner running without task".to_string());
        }
        if self.status == CleanerStatus::Stopped && self.task.is_some() {
            return Err("cleaner stopped with live task".to_string());
        }
        Ok(())
    }
}

fn with_state_validated<R>(
    state: &Mutex<CleanerState>,
    f: impl FnOnce(&mut CleanerState) -> R,
) -> R {
    let mut guard = state.lock();
    let out = f(&mut guard);
    if let Err(violation) = guard.validate() {
        debug_assert!(false, "cleaner state invariant violated: {violation}");
        warn!(%violation, "Cleaner state invariant violated");
    }
    out
}

/// Recurring expiry task with an explicit start/stop lifecycle
pub struct RegistrationCleaner {
    cleanup_interval: Duration,
    initial_delay: Duration,
    shutdown_timeout: Duration,
    state: Arc<Mutex<CleanerState>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RegistrationCleaner {
    /// Create a stopped cleaner
    pub fn new(cleanup_interval: Duration, initial_delay: Duration, shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            cleanup_interval,
            initial_delay,
            shutdown_timeout,
            state: Arc::new(Mutex::new(CleanerState {
                status: CleanerStatus::Stopped,
                task: None,
                last_report: None,
            })),
            shutdown_tx,
        }
    }

    /// Current lifecycle state
    pub fn status(&self) -> CleanerStatus {
        self.state.lock().status
    }

    /// Check if the cleaner task is scheduled
    pub fn is_running(&self) -> bool {
        self.status() == CleanerStatus::Running
    }

    /// Result of the most recent sweep, scheduled or manual
    pub fn last_report(&self) -> Option<SweepReport> {
        self.state.lock().last_report
    }

    pub(crate) fn record_report(&self, report: SweepReport) {
        self.state.lock().last_report = Some(report);
    }

    /// Schedule recurring sweeps of `target`.
    ///
    /// Returns `false` without doing anything unless the cleaner is stopped.
    /// Must be called from within a tokio runtime.
    pub fn start<S: Sweep>(&self, target: Weak<S>) -> bool {
        let mut state = self.state.lock();
        if state.status != CleanerStatus::Stopped {
            return false;
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_cleanup_loop(
            target,
            self.cleanup_interval,
            self.initial_delay,
            shutdown_rx,
            Arc::clone(&self.state),
        ));

        state.task = Some(handle);
        state.status = CleanerStatus::Running;
        true
    }

    /// Cancel future sweeps and wait (bounded) for an in-flight one.
    ///
    /// Returns `false` if the cleaner was not running. If the wait exceeds
    /// `shutdown_timeout` the task is aborted and the cleaner still ends up
    /// `Stopped`.
    pub async fn stop(&self) -> bool {
        let handle = {
            let mut state = self.state.lock();
            if state.status != CleanerStatus::Running {
                return false;
            }
            state.status = CleanerStatus::Stopping;
            state.task.take()
        };
        self.shutdown_tx.send_replace(true);

        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Cleaner task ended abnormally"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "Timed out waiting for in-flight sweep, aborting cleaner task"
                    );
                    handle.abort();
                }
            }
        }

        with_state_validated(&self.state, |state| state.status = CleanerStatus::Stopped);
        true
    }
}

impl Drop for RegistrationCleaner {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.state.lock().task.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RegistrationCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCleaner")
            .field("cleanup_interval", &self.cleanup_interval)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn run_cleanup_loop<S: Sweep>(
    target: Weak<S>,
    cleanup_interval: Duration,
    initial_delay: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<Mutex<CleanerState>>,
) {
    let mut ticker = interval_at(Instant::now() + initial_delay, cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_ms = cleanup_interval.as_millis() as u64,
        initial_delay_ms = initial_delay.as_millis() as u64,
        "Registration cleaner started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    debug!("Registry dropped, cleaner exiting");
                    break;
                };
                let report = match AssertUnwindSafe(target.sweep()).catch_unwind().await {
                    Ok(report) => report,
                    Err(_) => {
                        warn!("Unexpected panic while cleaning registrations");
                        SweepReport::failed()
                    }
                };
                state.lock().last_report = Some(report);
            }
        }
    }

    info!("Registration cleaner stopped");
}
