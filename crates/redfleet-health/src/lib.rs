//! redfleet-health: liveness probing for the Redis connection fleet.
//!
//! # Architecture
//!
//! ```text
//! HealthSchedule (optional periodic caller)
//!   └── HealthProber::probe_all  (semaphore-bounded tokio tasks)
//!         └── HealthProber::probe
//!               ├── ConnectionRegistry::build_target   (vault decrypt)
//!               ├── Pinger::ping on the blocking pool  (per-probe timeout)
//!               │     └── RespPinger: AUTH → SELECT → PING → INFO
//!               └── StateStore::record_probe            (log + health fields)
//! ```
//!
//! Classification of a failed check:
//!
//! | Cause | State |
//! |---|---|
//! | refused, DNS failure, TLS failure, auth rejected, bad secret | `error` |
//! | no reply within the timeout | `timeout` |
//! | anything else (unexpected reply, dropped connection) | `unhealthy` |

pub mod checker;
pub mod monitor;
pub mod prober;
pub mod resp;
pub mod transport;

pub use checker::{PingOutcome, Pinger, RespPinger};
pub use monitor::{HealthSchedule, ScheduleHandle};
pub use prober::{HealthProber, ProbeReport};
pub use resp::ServerStats;
pub use transport::TlsConfig;
