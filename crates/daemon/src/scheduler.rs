// Periodic trigger for the synchronization pass.
//
// The directory only needs the `SyncSchedule` surface (activate when the
// first repository appears, cancel when the last one goes, force a pass on a
// material settings change). The driver half owns the loop and is spawned
// with the orchestrator once both exist, which breaks the construction cycle
// between directory and orchestrator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Default gap between periodic synchronization passes (one hour).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Control surface of the periodic schedule.
///
/// `activate` while active and `cancel` while idle are no-ops. `run_now`
/// activates the schedule if needed and triggers an immediate pass.
pub trait SyncSchedule: Send + Sync {
    fn activate(&self);
    fn cancel(&self);
    fn run_now(&self);
}

/// One full synchronization pass. Returns whether every repository
/// synchronized cleanly.
pub trait SyncPass: Send + Sync + 'static {
    fn run(&self) -> impl Future<Output = bool> + Send;
}

pub struct SyncScheduler;

impl SyncScheduler {
    pub fn new(interval: Duration) -> (SchedulerHandle, SchedulerDriver) {
        let (active_tx, active_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run_now = Arc::new(Notify::new());

        let handle = SchedulerHandle {
            active_tx,
            run_now: run_now.clone(),
            shutdown_tx,
        };
        let driver = SchedulerDriver { interval, active_rx, run_now, shutdown_rx };
        (handle, driver)
    }
}

/// Cheap clonable handle; the directory holds it as `Arc<dyn SyncSchedule>`.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    active_tx: watch::Sender<bool>,
    run_now: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    /// Stop the loop for good. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl SyncSchedule for SchedulerHandle {
    fn activate(&self) {
        let was_active = *self.active_tx.borrow();
        let _ = self.active_tx.send(true);
        if !was_active {
            debug!("synchronization schedule activated");
            // First pass runs immediately, not one interval from now.
            self.run_now.notify_one();
        }
    }

    fn cancel(&self) {
        if *self.active_tx.borrow() {
            debug!("synchronization schedule cancelled");
        }
        let _ = self.active_tx.send(false);
    }

    fn run_now(&self) {
        let _ = self.active_tx.send(true);
        self.run_now.notify_one();
    }
}

/// The loop half. `spawn` it once the pass runner exists.
pub struct SchedulerDriver {
    interval: Duration,
    active_rx: watch::Receiver<bool>,
    run_now: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerDriver {
    pub fn spawn<R: SyncPass>(self, runner: R) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(runner))
    }

    async fn run<R: SyncPass>(mut self, runner: R) {
        info!(interval_secs = self.interval.as_secs(), "synchronization scheduler started");
        loop {
            if !*self.active_rx.borrow_and_update() {
                // Idle: only a state change can wake us. The run-now permit,
                // if any, is kept for the moment the schedule goes active.
                tokio::select! {
                    changed = self.active_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = self.shutdown_rx.changed() => {
                        if *self.shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = self.run_now.notified() => {}
                changed = self.active_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if !*self.active_rx.borrow() {
                continue;
            }
            if !runner.run().await {
                warn!("synchronization pass completed with failures");
            }
        }
        info!("synchronization scheduler stopped");
    }
}
