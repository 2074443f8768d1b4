//! Periodic health checks over the active fleet.
//!
//! The core never probes on its own; a [`HealthSchedule`] is the optional
//! periodic caller. Each tick lists the active connections and runs
//! [`HealthProber::probe_all`] over them, until the shutdown signal fires.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use redfleet_registry::ConnectionFilter;

use crate::prober::{HealthProber, ProbeReport};

pub struct HealthSchedule {
    prober: HealthProber,
    interval: Duration,
}

/// Handle to a running schedule.
pub struct ScheduleHandle {
    handle: JoinHandle<u64>,
    shutdown_tx: watch::Sender<bool>,
}

impl ScheduleHandle {
    /// Signal shutdown and wait for the loop to exit. Returns the number of
    /// completed rounds.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        self.handle.await.unwrap_or(0)
    }
}

impl HealthSchedule {
    pub fn new(prober: HealthProber, interval: Duration) -> Self {
        Self { prober, interval }
    }

    /// Probe every active connection once.
    pub async fn run_once(&self) -> ProbeReport {
        let conns = match self.prober.connections().list(&ConnectionFilter::active()) {
            Ok(conns) => conns,
            Err(e) => {
                error!(error = %e, "failed to list active connections");
                Vec::new()
            }
        };
        self.prober.probe_all(conns).await
    }

    /// Run rounds until `shutdown` changes. The first round starts
    /// immediately. Returns the number of completed rounds.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(interval_ms = self.interval.as_millis() as u64, "health schedule starting");
        let mut rounds = 0u64;
        loop {
            let report = self.run_once().await;
            rounds += 1;
            debug!(round = rounds, total = report.total, succeeded = report.succeeded, "health round complete");

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    debug!("health schedule shutting down");
                    break;
                }
            }
        }
        info!(rounds, "health schedule stopped");
        rounds
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> ScheduleHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        ScheduleHandle {
            handle,
            shutdown_tx,
        }
    }
}
