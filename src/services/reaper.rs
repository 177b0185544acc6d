//! Background reclamation of expired files.
//!
//! The reaper runs as its own task, independent of request handling. Each
//! cycle reads the clock once, asks the metadata store for a bounded batch of
//! records expired as of that instant, and reaps them. A record that fails to
//! delete is logged and left for the next cycle, where it will be found again.

use futures::{StreamExt, stream};
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::share_service::{ShareResult, ShareService};

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_REAPER_BATCH_SIZE: usize = 1000;

/// Deletes in flight at once within a cycle.
const REAP_CONCURRENCY: usize = 8;

/// Outcome of one reaper cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Expired records returned by the metadata store.
    pub expired: usize,
    pub reaped: usize,
    pub failed: usize,
    /// Blobs removed because no metadata referenced them.
    pub orphan_blobs: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.orphan_blobs == 0
    }
}

#[derive(Clone)]
pub struct Reaper {
    service: ShareService,
    batch_size: usize,
}

impl Reaper {
    pub fn new(service: ShareService, batch_size: usize) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
        }
    }

    /// Run a single cycle against the service's current time.
    pub async fn run_cycle(&self) -> ShareResult<ReapReport> {
        let now = self.service.now();
        let expired = self.service.expired_batch(now, self.batch_size).await?;

        let mut report = ReapReport {
            expired: expired.len(),
            ..ReapReport::default()
        };

        let service = &self.service;
        let outcomes: Vec<_> = stream::iter(expired)
            .map(|record| async move { (record.id, service.reap(record.id).await) })
            .buffer_unordered(REAP_CONCURRENCY)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.reaped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(%id, error = %err, "reaper: failed to delete expired file");
                }
            }
        }

        match self.service.sweep_orphan_blobs(now, self.batch_size).await {
            Ok(removed) => report.orphan_blobs = removed,
            Err(err) => warn!(error = %err, "reaper: orphan sweep failed"),
        }

        Ok(report)
    }

    /// Start the recurring task. The first cycle runs immediately.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        // `tokio::time::interval` panics on a zero period.
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }
                if token.is_cancelled() {
                    break;
                }

                match self.run_cycle().await {
                    Ok(report) if report.is_empty() => debug!("reaper: nothing to clean up"),
                    Ok(report) => info!(
                        expired = report.expired,
                        reaped = report.reaped,
                        failed = report.failed,
                        orphan_blobs = report.orphan_blobs,
                        "reaper cycle complete"
                    ),
                    Err(err) => warn!(error = %err, "reaper cycle failed"),
                }
            }

            info!("reaper stopped");
        });

        ReaperHandle { cancel, task }
    }
}

/// Owner of a running reaper task.
pub struct ReaperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the task and wait for its current cycle to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "reaper task ended abnormally");
        }
    }
}
