//! Background maintenance: periodic tier sweeps and scheduled backups
//!
//! The task runs off the request path. Each cycle either sweeps the tiers
//! (retention expiry, then idle demotion) and drops stale gatekeeper state,
//! or takes a scheduled backup and prunes old ones. Shutdown is signalled through a `watch` channel; a sweep
//! already in progress stops on its own once the store is closed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::access::{Gatekeeper, failure_idle};
use crate::backup::{BackupManager, BackupManifest, PruneReport, SCHEDULED_TYPE};
use crate::config::{BackupConfig, MaintenanceConfig};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::storage::{SweepReport, TierManager};

pub struct MaintenanceTask {
    tiers: Arc<TierManager>,
    backups: Arc<BackupManager>,
    gatekeeper: Arc<Gatekeeper>,
    sweep_interval: Option<Duration>,
    backup_interval: Option<Duration>,
    retention_days: u64,
}

impl MaintenanceTask {
    pub fn new(
        tiers: Arc<TierManager>,
        backups: Arc<BackupManager>,
        gatekeeper: Arc<Gatekeeper>,
        maintenance: &MaintenanceConfig,
        backup: &BackupConfig,
        diagnostics: &Diagnostics,
    ) -> Self {
        let backup_interval = non_zero_secs(backup.interval_secs);
        diagnostics.set_capability(
            "scheduled_backups",
            backup_interval.is_some(),
            match backup_interval {
                Some(every) => format!(
                    "every {}s, keeping {} days",
                    every.as_secs(),
                    backup.retention_days
                ),
                None => "disabled (backup.interval_secs = 0)".to_string(),
            },
        );

        Self {
            tiers,
            backups,
            gatekeeper,
            sweep_interval: non_zero_secs(maintenance.sweep_interval_secs),
            backup_interval,
            retention_days: backup.retention_days,
        }
    }

    /// One sweep pass over all tiers, then over gatekeeper client state
    pub async fn run_sweep(&self) -> SweepReport {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let report = self.tiers.sweep(now).await;
        if !report.interrupted {
            self.gatekeeper.cleanup_stale(now, failure_idle());
        }
        self.tiers
            .diagnostics()
            .record("sweep", started.elapsed(), report.failures == 0);
        report
    }

    /// Take a scheduled backup, then prune backups past retention
    pub async fn run_backup(&self) -> Result<(BackupManifest, PruneReport)> {
        let manifest = self.backups.create(SCHEDULED_TYPE).await?;
        let pruned = self.backups.prune(self.retention_days).await?;
        Ok((manifest, pruned))
    }

    /// Spawn the maintenance loop. It exits when `shutdown` turns true or
    /// its sender is dropped.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_ticker = self.sweep_interval.map(ticker);
            let mut backup_ticker = self.backup_interval.map(ticker);

            tracing::info!(
                sweep_secs = self.sweep_interval.map(|d| d.as_secs()),
                backup_secs = self.backup_interval.map(|d| d.as_secs()),
                "Maintenance task started"
            );

            loop {
                if *shutdown.borrow() || self.tiers.is_closed() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tick(&mut sweep_ticker) => {
                        let report = self.run_sweep().await;
                        if report.interrupted {
                            break;
                        }
                    }
                    _ = tick(&mut backup_ticker) => {
                        if let Err(e) = self.run_backup().await {
                            tracing::warn!("Scheduled backup failed: {e}");
                        }
                    }
                }
            }

            tracing::info!("Maintenance task stopped");
        })
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Wait for the next tick, or forever when the schedule is disabled
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
