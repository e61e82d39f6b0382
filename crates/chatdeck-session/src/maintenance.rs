//! Maintenance Scheduler
//!
//! Periodic sweep: retire data past retention, suspend idle background tabs,
//! then evict suspended tabs while too many are resident. Sweeps run on the
//! blocking pool and never overlap; cancellation is only observed between
//! sweeps.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use chatdeck_isolation::IsolationRuntime;

use crate::config::MaintenanceConfig;
use crate::tab_manager::TabManager;

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub archived: Vec<String>,
    pub checkpoints_deleted: usize,
    pub suspended: Vec<String>,
    pub evicted: Vec<String>,
    /// Records the retention pass could not process
    pub failures: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty()
            && self.checkpoints_deleted == 0
            && self.suspended.is_empty()
            && self.evicted.is_empty()
            && self.failures == 0
    }
}

pub struct MaintenanceScheduler {
    sweeper: Sweeper,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(tabs: TabManager, config: MaintenanceConfig) -> Self {
        Self {
            sweeper: Sweeper {
                tabs,
                config,
                runtime: None,
            },
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Release the isolated lanes of tabs a sweep evicts or archives
    pub fn with_runtime(mut self, runtime: Arc<IsolationRuntime>) -> Self {
        self.sweeper.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.sweeper.config
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the periodic loop. Must be called within a Tokio runtime.
    /// Returns `false` if the loop is already running or was shut down.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.cancel.is_cancelled() {
            return false;
        }

        let sweeper = self.sweeper.clone();
        let cancel = self.cancel.clone();
        let period = self.sweeper.config.interval();

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sweeper.run().await;
                    }
                }
            }

            tracing::debug!("Maintenance loop stopped");
        }));

        tracing::info!(interval_secs = period.as_secs(), "Started maintenance scheduler");
        true
    }

    /// Sweep now, outside the periodic schedule
    pub async fn run_once(&self) -> MaintenanceReport {
        self.sweeper.run().await
    }

    /// Stop the loop, waiting up to `timeout` for a sweep in progress
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                tracing::warn!("Maintenance sweep did not finish in time, aborting");
                handle.abort();
            }
        }
    }
}

#[derive(Clone)]
struct Sweeper {
    tabs: TabManager,
    config: MaintenanceConfig,
    runtime: Option<Arc<IsolationRuntime>>,
}

impl Sweeper {
    async fn run(&self) -> MaintenanceReport {
        let tabs = self.tabs.clone();
        let config = self.config.clone();

        let report = match tokio::task::spawn_blocking(move || sweep(&tabs, &config)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Maintenance sweep failed");
                return MaintenanceReport {
                    failures: 1,
                    ..MaintenanceReport::default()
                };
            }
        };

        if let Some(runtime) = &self.runtime {
            for tab_id in report.evicted.iter().chain(&report.archived) {
                runtime.release(tab_id).await;
            }
        }

        if report.is_empty() {
            tracing::debug!("Maintenance sweep found nothing to do");
        } else {
            tracing::info!(
                archived = report.archived.len(),
                checkpoints_deleted = report.checkpoints_deleted,
                suspended = report.suspended.len(),
                evicted = report.evicted.len(),
                failures = report.failures,
                "Maintenance sweep complete"
            );
        }

        report
    }
}

fn sweep(tabs: &TabManager, config: &MaintenanceConfig) -> MaintenanceReport {
    let keep = tabs.protected_tab_ids();
    let cleanup = tabs
        .store()
        .cleanup_old_data_except(config.retention(), &keep);
    tabs.forget_archived(&cleanup.archived_ids);

    let suspended = tabs.suspend_inactive(config.inactivity_threshold());
    let evicted = tabs.evict_suspended(config.max_resident_tabs);

    MaintenanceReport {
        archived: cleanup.archived_ids,
        checkpoints_deleted: cleanup.checkpoints_deleted,
        suspended,
        evicted,
        failures: cleanup.failures,
    }
}
