//! Health prober: runs liveness checks and records their outcome.
//!
//! `probe` never fails. Every failure mode, including an undecryptable
//! secret or a panicking check, becomes a [`HealthLog`] with a failure
//! status. `probe_all` fans out over a semaphore-bounded set of tasks and
//! returns one result per input connection, in input order. A permit is
//! held by the blocking check itself, so a check that outlives its timeout
//! still counts against the limit until it returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use redfleet_registry::ConnectionRegistry;
use redfleet_state::{HealthLog, HealthState, RedisConnection};

use crate::checker::{PingOutcome, Pinger};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Result of a batch probe. Partial success is a normal outcome.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// One log per probed connection, in input order.
    pub results: Vec<HealthLog>,
    pub succeeded: usize,
    pub total: usize,
}

impl ProbeReport {
    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }
}

#[derive(Clone)]
pub struct HealthProber {
    connections: ConnectionRegistry,
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
    concurrency: usize,
}

impl HealthProber {
    pub fn new(connections: ConnectionRegistry, pinger: Arc<dyn Pinger>) -> Self {
        Self {
            connections,
            pinger,
            timeout: DEFAULT_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum probes in flight during [`HealthProber::probe_all`]. Zero is
    /// treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Check one connection, append a health log, and update the
    /// connection's health fields. Returns the log.
    pub async fn probe(&self, conn: &RedisConnection) -> HealthLog {
        self.probe_holding(conn, None).await
    }

    async fn probe_holding(&self, conn: &RedisConnection, permit: Option<OwnedSemaphorePermit>) -> HealthLog {
        let outcome = self.check(conn, permit).await;

        let mut log = HealthLog::new(conn.id, outcome.status, redfleet_core::epoch_secs());
        log.latency_ms = outcome.latency_ms;
        log.error_message = outcome.error;
        log.memory_used_mb = outcome.stats.memory_used_mb;
        log.connected_clients = outcome.stats.connected_clients;
        log.keys_count = outcome.stats.keys_count;
        log.metadata = outcome.metadata;

        if log.is_healthy() {
            debug!(connection_id = conn.id, name = %conn.name, latency_ms = ?log.latency_ms, "probe healthy");
        } else {
            warn!(
                connection_id = conn.id,
                name = %conn.name,
                status = %log.status,
                error = log.error_message.as_deref().unwrap_or(""),
                "probe failed"
            );
        }

        match self.connections.store().record_probe(&log) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(connection_id = conn.id, error = %e, "failed to record probe result");
                log
            }
        }
    }

    /// Probe every connection concurrently, bounded by the configured
    /// concurrency. Never fails as a whole.
    pub async fn probe_all(&self, conns: Vec<RedisConnection>) -> ProbeReport {
        let total = conns.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let handles: Vec<_> = conns
            .into_iter()
            .map(|conn| {
                let prober = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let id = conn.id;
                let handle = tokio::spawn(async move {
                    // The semaphore is never closed.
                    let permit = semaphore.acquire_owned().await.ok();
                    prober.probe_holding(&conn, permit).await
                });
                (id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (id, handle) in handles {
            let log = match handle.await {
                Ok(log) => log,
                Err(e) => {
                    warn!(connection_id = id, error = %e, "probe task did not complete");
                    let mut log = HealthLog::new(id, HealthState::Unhealthy, redfleet_core::epoch_secs());
                    log.error_message = Some(format!("probe task failed: {e}"));
                    log
                }
            };
            results.push(log);
        }

        let succeeded = results.iter().filter(|l| l.is_healthy()).count();
        info!(total, succeeded, "probe batch complete");
        ProbeReport {
            results,
            succeeded,
            total,
        }
    }

    async fn check(&self, conn: &RedisConnection, permit: Option<OwnedSemaphorePermit>) -> PingOutcome {
        let target = match self.connections.build_target(conn) {
            Ok(target) => target,
            Err(e) => {
                return PingOutcome::failed(HealthState::Error, format!("cannot build connection target: {e}"));
            }
        };

        let pinger = Arc::clone(&self.pinger);
        let timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pinger.ping(&target, timeout)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => PingOutcome::failed(HealthState::Unhealthy, format!("probe task failed: {e}")),
            Err(_) => PingOutcome::failed(
                HealthState::Timeout,
                format!("no response within {}ms", self.timeout.as_millis()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use redfleet_registry::{AuditTrail, ConnectionTarget, NewConnection};
    use redfleet_state::StateStore;
    use redfleet_vault::{CredentialVault, KEY_LEN};

    use crate::checker::RespPinger;
    use crate::checker::fake::{Script, serve};

    /// Answers by port: 1 healthy, 2 refused, 3 hangs, 4 panics.
    struct ScriptedPinger {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedPinger {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl Pinger for ScriptedPinger {
        fn ping(&self, target: &ConnectionTarget, _timeout: Duration) -> PingOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            let outcome = match target.port {
                1 => PingOutcome::healthy(0.5),
                2 => PingOutcome::failed(HealthState::Error, "connection refused"),
                3 => {
                    std::thread::sleep(Duration::from_millis(600));
                    PingOutcome::healthy(600.0)
                }
                _ => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    panic!("pinger exploded");
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn registry() -> ConnectionRegistry {
        let store = StateStore::open_in_memory().unwrap();
        let vault = Arc::new(CredentialVault::new(&[5u8; KEY_LEN]).unwrap());
        ConnectionRegistry::new(store.clone(), vault, AuditTrail::new(store))
    }

    fn add(reg: &ConnectionRegistry, name: &str, host: &str, port: u32) -> RedisConnection {
        let mut input = NewConnection::new(name, host);
        input.port = port;
        reg.create(input).unwrap()
    }

    #[tokio::test]
    async fn healthy_probe_updates_connection() {
        let reg = registry();
        let addr = serve(Script::default());
        let conn = add(&reg, "cache", "127.0.0.1", addr.port().into());

        let prober = HealthProber::new(reg.clone(), Arc::new(RespPinger::new()));
        let log = prober.probe(&conn).await;

        assert_eq!(log.status, HealthState::Healthy, "{log:?}");
        assert!(log.id > 0);
        assert_eq!(log.keys_count, Some(5));

        let after = reg.get(conn.id).unwrap();
        assert_eq!(after.health, HealthState::Healthy);
        assert_eq!(after.last_checked_at, Some(log.checked_at));
        assert!(after.last_error.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_error_with_message() {
        let reg = registry();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let conn = add(&reg, "gone", "127.0.0.1", port.into());

        let prober = HealthProber::new(reg.clone(), Arc::new(RespPinger::new()));
        let log = prober.probe(&conn).await;

        assert_eq!(log.status, HealthState::Error);
        assert!(log.error_message.is_some());
        let after = reg.get(conn.id).unwrap();
        assert_eq!(after.health, HealthState::Error);
        assert_eq!(after.last_error, log.error_message);
        assert_eq!(reg.store().list_health_logs(conn.id, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_clears_last_error() {
        let reg = registry();
        let conn = add(&reg, "flappy", "127.0.0.1", 2);
        let prober = HealthProber::new(reg.clone(), Arc::new(ScriptedPinger::new()));

        prober.probe(&conn).await;
        assert!(reg.get(conn.id).unwrap().last_error.is_some());

        let mut options = BTreeMap::new();
        options.insert("note".to_string(), "moved".to_string());
        let moved = reg
            .update(
                conn.id,
                redfleet_registry::ConnectionPatch {
                    port: Some(1),
                    options: Some(options),
                    ..Default::default()
                },
            )
            .unwrap();
        prober.probe(&moved).await;
        let after = reg.get(conn.id).unwrap();
        assert_eq!(after.health, HealthState::Healthy);
        assert!(after.last_error.is_none());
    }

    #[tokio::test]
    async fn bad_secret_becomes_error_log() {
        let reg = registry();
        let mut conn = add(&reg, "sealed", "127.0.0.1", 1);
        conn.secret = Some("v1:00000000:AAAA".to_string());
        reg.store().put_connection(&conn).unwrap();

        let pinger = Arc::new(ScriptedPinger::new());
        let prober = HealthProber::new(reg.clone(), pinger.clone());
        let log = prober.probe(&conn).await;

        assert_eq!(log.status, HealthState::Error);
        assert!(log.error_message.unwrap().contains("connection target"));
        assert_eq!(pinger.peak.load(Ordering::SeqCst), 0, "pinger must not run");
        assert_eq!(reg.get(conn.id).unwrap().health, HealthState::Error);
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let reg = registry();
        let conn = add(&reg, "slow", "127.0.0.1", 3);
        let prober = HealthProber::new(reg.clone(), Arc::new(ScriptedPinger::new()))
            .with_timeout(Duration::from_millis(100));

        let log = prober.probe(&conn).await;
        assert_eq!(log.status, HealthState::Timeout);
    }

    #[tokio::test]
    async fn probe_all_returns_one_result_per_connection_in_order() {
        let reg = registry();
        let conns = vec![
            add(&reg, "a", "127.0.0.1", 1),
            add(&reg, "b", "127.0.0.1", 2),
            add(&reg, "c", "127.0.0.1", 4),
            add(&reg, "d", "127.0.0.1", 1),
            add(&reg, "e", "127.0.0.1", 3),
        ];
        let ids: Vec<_> = conns.iter().map(|c| c.id).collect();
        let prober = HealthProber::new(reg.clone(), Arc::new(ScriptedPinger::new()))
            .with_timeout(Duration::from_millis(300));

        let report = prober.probe_all(conns).await;

        assert_eq!(report.total, 5);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.results.iter().map(|l| l.connection_id).collect::<Vec<_>>(), ids);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed(), 3);

        let statuses: Vec<_> = report.results.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![
                HealthState::Healthy,
                HealthState::Error,
                HealthState::Unhealthy,
                HealthState::Healthy,
                HealthState::Timeout,
            ]
        );
    }

    #[tokio::test]
    async fn probe_all_respects_concurrency_limit() {
        let reg = registry();
        let conns: Vec<_> = (0..12)
            .map(|i| add(&reg, &format!("c{i}"), "127.0.0.1", 1))
            .collect();
        let pinger = Arc::new(ScriptedPinger::new());
        let prober = HealthProber::new(reg.clone(), pinger.clone()).with_concurrency(3);

        let report = prober.probe_all(conns).await;

        assert_eq!(report.succeeded, 12);
        assert!(pinger.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn timed_out_checks_keep_their_slot_until_they_return() {
        let reg = registry();
        let conns: Vec<_> = (0..6)
            .map(|i| add(&reg, &format!("hang{i}"), "127.0.0.1", 3))
            .collect();
        let pinger = Arc::new(ScriptedPinger::new());
        let prober = HealthProber::new(reg.clone(), pinger.clone())
            .with_timeout(Duration::from_millis(50))
            .with_concurrency(2);

        let report = prober.probe_all(conns).await;

        assert!(report.results.iter().all(|l| l.status == HealthState::Timeout));
        assert!(
            pinger.peak.load(Ordering::SeqCst) <= 2,
            "peak {} checks in flight",
            pinger.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn probe_all_of_nothing() {
        let prober = HealthProber::new(registry(), Arc::new(ScriptedPinger::new()));
        let report = prober.probe_all(Vec::new()).await;
        assert_eq!(report.total, 0);
        assert_eq!(report.succeeded, 0);
        assert!(report.results.is_empty());
    }
}
