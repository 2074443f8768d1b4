//! Liveness checks against a single Redis endpoint.
//!
//! A check connects, authenticates if the target carries credentials,
//! selects the logical database, and expects `+PONG` to a `PING`. Latency is
//! the PING round trip. After a successful PING the checker reads `INFO`
//! for server statistics; a failing INFO does not fail the check.
//!
//! The timeout covers the whole check. Each read and write is bounded by
//! whatever is left of it.

use std::collections::BTreeMap;
use std::io::{self, BufReader, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use redfleet_registry::ConnectionTarget;
use redfleet_state::HealthState;

use crate::resp::{Reply, RespError, ServerStats, encode_command, parse_info, read_reply};
use crate::transport::{ConnectError, TlsConfig, Transport, connect};

/// Outcome of one liveness check. Never an error: failures are a status.
#[derive(Debug, Clone, PartialEq)]
pub struct PingOutcome {
    pub status: HealthState,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    pub stats: ServerStats,
    pub metadata: BTreeMap<String, String>,
}

impl PingOutcome {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            status: HealthState::Healthy,
            latency_ms: Some(latency_ms),
            error: None,
            stats: ServerStats::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn failed(status: HealthState, error: impl Into<String>) -> Self {
        Self {
            status,
            latency_ms: None,
            error: Some(error.into()),
            stats: ServerStats::default(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Something that can check a connection target.
///
/// Implementations block; the prober runs them on the blocking pool.
pub trait Pinger: Send + Sync {
    fn ping(&self, target: &ConnectionTarget, timeout: Duration) -> PingOutcome;
}

/// RESP-speaking pinger over plain TCP or TLS.
pub struct RespPinger {
    tls: Option<TlsConfig>,
}

impl RespPinger {
    /// A pinger that can reach `rediss` targets using the Mozilla roots.
    pub fn new() -> Self {
        let tls = match TlsConfig::with_webpki_roots() {
            Ok(tls) => Some(tls),
            Err(e) => {
                warn!(error = %e, "tls unavailable; rediss targets will fail");
                None
            }
        };
        Self { tls }
    }

    pub fn with_tls(tls: TlsConfig) -> Self {
        Self { tls: Some(tls) }
    }
}

impl Default for RespPinger {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a check failed, before mapping to a health state.
#[derive(Debug)]
enum CheckFailure {
    /// Could not reach or authenticate to the server.
    Unreachable(String),
    /// The server did not answer in time.
    TimedOut(String),
    /// Reached the server, but it did not behave.
    Misbehaved(String),
}

impl CheckFailure {
    fn into_outcome(self) -> PingOutcome {
        match self {
            CheckFailure::Unreachable(msg) => PingOutcome::failed(HealthState::Error, msg),
            CheckFailure::TimedOut(msg) => PingOutcome::failed(HealthState::Timeout, msg),
            CheckFailure::Misbehaved(msg) => PingOutcome::failed(HealthState::Unhealthy, msg),
        }
    }
}

impl From<ConnectError> for CheckFailure {
    fn from(e: ConnectError) -> Self {
        if e.is_timeout() {
            CheckFailure::TimedOut(e.to_string())
        } else {
            CheckFailure::Unreachable(e.to_string())
        }
    }
}

impl From<RespError> for CheckFailure {
    fn from(e: RespError) -> Self {
        match e {
            RespError::Io(io) if is_timeout(&io) => {
                CheckFailure::TimedOut(format!("no response within timeout: {io}"))
            }
            RespError::Io(io) if io.kind() == io::ErrorKind::ConnectionRefused => {
                CheckFailure::Unreachable(io.to_string())
            }
            other => CheckFailure::Misbehaved(other.to_string()),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

impl Pinger for RespPinger {
    fn ping(&self, target: &ConnectionTarget, timeout: Duration) -> PingOutcome {
        match self.check(target, timeout) {
            Ok(outcome) => outcome,
            Err(failure) => {
                debug!(host = %target.host, port = target.port, ?failure, "liveness check failed");
                failure.into_outcome()
            }
        }
    }
}

impl RespPinger {
    fn check(&self, target: &ConnectionTarget, timeout: Duration) -> Result<PingOutcome, CheckFailure> {
        let tls = if target.is_tls() {
            Some(self.tls.as_ref().ok_or_else(|| {
                CheckFailure::Unreachable("tls requested but no tls configuration is available".to_string())
            })?)
        } else {
            None
        };

        let deadline = Instant::now() + timeout;
        let transport = connect(&target.host, target.port, timeout, tls)?;
        let mut session = Session::new(transport, deadline);

        if let Some(password) = target.password.as_deref() {
            let reply = match target.username.as_deref() {
                Some(user) => session.command(&["AUTH", user, password])?,
                None => session.command(&["AUTH", password])?,
            };
            if let Reply::Error(e) = reply {
                return Err(CheckFailure::Unreachable(format!("authentication failed: {e}")));
            }
        }

        if target.database != 0 {
            let db = target.database.to_string();
            if let Reply::Error(e) = session.command(&["SELECT", &db])? {
                return Err(CheckFailure::Misbehaved(format!("SELECT {db} rejected: {e}")));
            }
        }

        let started = Instant::now();
        let reply = session.command(&["PING"])?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match reply {
            Reply::Simple(s) if s == "PONG" => {}
            Reply::Error(e) if e.starts_with("NOAUTH") || e.starts_with("WRONGPASS") => {
                return Err(CheckFailure::Unreachable(format!("authentication failed: {e}")));
            }
            other => {
                return Err(CheckFailure::Misbehaved(format!("unexpected PING reply: {other:?}")));
            }
        }

        let mut outcome = PingOutcome::healthy(latency_ms);
        outcome.metadata.insert("tls".to_string(), target.is_tls().to_string());
        match session.command(&["INFO"]) {
            Ok(reply) => {
                if let Some(info) = reply.as_text() {
                    outcome.stats = parse_info(&info);
                    if let Some(version) = info
                        .lines()
                        .find_map(|l| l.strip_prefix("redis_version:"))
                    {
                        outcome
                            .metadata
                            .insert("redis_version".to_string(), version.trim().to_string());
                    }
                }
            }
            Err(e) => debug!(host = %target.host, error = %e, "INFO failed after successful PING"),
        }

        session.close();
        Ok(outcome)
    }
}

/// A transport whose every read and write must finish before `deadline`.
struct Bounded {
    transport: Transport,
    deadline: Instant,
}

impl Bounded {
    fn arm(&self) -> io::Result<()> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "check deadline passed"));
        }
        self.transport.set_timeout(remaining)
    }
}

impl Read for Bounded {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.transport.read(buf)
    }
}

impl Write for Bounded {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.arm()?;
        self.transport.flush()
    }
}

/// One request/response exchange at a time over a buffered transport.
struct Session {
    reader: BufReader<Bounded>,
}

impl Session {
    fn new(transport: Transport, deadline: Instant) -> Self {
        Self {
            reader: BufReader::new(Bounded { transport, deadline }),
        }
    }

    fn command(&mut self, args: &[&str]) -> Result<Reply, RespError> {
        let stream = self.reader.get_mut();
        stream.write_all(&encode_command(args))?;
        stream.flush()?;
        read_reply(&mut self.reader)
    }

    fn close(self) {
        self.reader.get_ref().transport.shutdown();
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{Script, serve};
    use super::*;
    use std::net::{SocketAddr, TcpListener};

    fn target(addr: SocketAddr, password: Option<&str>, database: u8) -> ConnectionTarget {
        ConnectionTarget {
            scheme: "redis".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            database,
            username: None,
            password: password.map(str::to_string),
            params: BTreeMap::new(),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn healthy_server_reports_latency_and_stats() {
        let addr = serve(Script::default());
        let outcome = RespPinger::new().ping(&target(addr, None, 3), TIMEOUT);

        assert_eq!(outcome.status, HealthState::Healthy, "{outcome:?}");
        assert!(outcome.latency_ms.is_some());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.stats.memory_used_mb, Some(2));
        assert_eq!(outcome.stats.connected_clients, Some(3));
        assert_eq!(outcome.stats.keys_count, Some(5));
        assert_eq!(
            outcome.metadata.get("redis_version").map(String::as_str),
            Some("7.2.4")
        );
    }

    #[test]
    fn correct_password_authenticates() {
        let addr = serve(Script {
            password: Some("s3cret".to_string()),
            ..Script::default()
        });
        let outcome = RespPinger::new().ping(&target(addr, Some("s3cret"), 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Healthy, "{outcome:?}");
    }

    #[test]
    fn wrong_password_is_an_error() {
        let addr = serve(Script {
            password: Some("s3cret".to_string()),
            ..Script::default()
        });
        let outcome = RespPinger::new().ping(&target(addr, Some("nope"), 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Error);
        assert!(outcome.error.unwrap().contains("authentication failed"));
    }

    #[test]
    fn missing_password_is_an_error() {
        let addr = serve(Script {
            password: Some("s3cret".to_string()),
            ..Script::default()
        });
        let outcome = RespPinger::new().ping(&target(addr, None, 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Error);
    }

    #[test]
    fn refused_connection_is_an_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let outcome = RespPinger::new().ping(&target(addr, None, 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Error);
        assert!(outcome.error.unwrap().contains("refused"));
    }

    #[test]
    fn slow_pong_is_a_timeout() {
        let addr = serve(Script {
            ping_delay: Some(Duration::from_millis(800)),
            ..Script::default()
        });
        let outcome = RespPinger::new().ping(&target(addr, None, 0), Duration::from_millis(200));
        assert_eq!(outcome.status, HealthState::Timeout, "{outcome:?}");
    }

    #[test]
    fn timeout_covers_the_whole_exchange() {
        // Every step answers well inside the timeout; together they do not.
        let addr = serve(Script {
            password: Some("s3cret".to_string()),
            reply_delay: Some(Duration::from_millis(150)),
            ..Script::default()
        });
        let started = Instant::now();
        let outcome = RespPinger::new().ping(&target(addr, Some("s3cret"), 2), Duration::from_millis(350));

        assert_eq!(outcome.status, HealthState::Timeout, "{outcome:?}");
        assert!(started.elapsed() < Duration::from_millis(550), "took {:?}", started.elapsed());
    }

    #[test]
    fn unexpected_reply_is_unhealthy() {
        let addr = serve(Script {
            ping_reply: Some("-LOADING Redis is loading the dataset in memory\r\n".to_string()),
            ..Script::default()
        });
        let outcome = RespPinger::new().ping(&target(addr, None, 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Unhealthy);
        assert!(outcome.error.unwrap().contains("LOADING"));
    }

    #[test]
    fn silent_close_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                drop(stream);
            }
        });
        let outcome = RespPinger::new().ping(&target(addr, None, 0), TIMEOUT);
        assert_eq!(outcome.status, HealthState::Unhealthy, "{outcome:?}");
    }
}
