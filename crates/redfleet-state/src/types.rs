//! Domain types for the redfleet state store.
//!
//! These types represent the persisted state of the connection fleet. All
//! types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::tables::id_key;

pub type ApplicationId = u64;
pub type ConnectionId = u64;
pub type BindingId = u64;
pub type QueueConfigId = u64;
pub type HealthLogId = u64;
pub type AuditId = u64;

// ── Application ───────────────────────────────────────────────────

/// A tenant application that consumes Redis connections from the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: ApplicationId,
    /// Unique, URL-safe identifier.
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// Display color used by operator tooling.
    pub color: String,
    pub icon: Option<String>,
    pub active: bool,
    pub metadata: BTreeMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Set when soft-deleted; the row is kept for history.
    pub deleted_at: Option<u64>,
}

impl Application {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ── Redis connection ──────────────────────────────────────────────

/// A shared Redis endpoint definition plus its last known health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConnection {
    pub id: ConnectionId,
    /// Unique display name.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Logical database index (0–15).
    pub database: u8,
    /// Vault ciphertext of the password. Never plaintext.
    pub secret: Option<String>,
    /// Free-form client options merged into the connection target.
    pub options: BTreeMap<String, String>,
    pub active: bool,
    pub health: HealthState,
    pub last_checked_at: Option<u64>,
    pub last_error: Option<String>,
    pub environment: String,
    pub region: Option<String>,
    pub provider: Option<String>,
    pub notes: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub deleted_at: Option<u64>,
}

impl RedisConnection {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active and not soft-deleted.
    pub fn is_usable(&self) -> bool {
        self.active && !self.is_deleted()
    }
}

/// Health state as determined by the most recent probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Error,
    Timeout,
}

impl HealthState {
    /// Whether this state records a failed probe. `Unknown` is not a failure.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            HealthState::Unhealthy | HealthState::Error | HealthState::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Error => "error",
            HealthState::Timeout => "timeout",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthState::Unknown),
            "healthy" => Ok(HealthState::Healthy),
            "unhealthy" => Ok(HealthState::Unhealthy),
            "error" => Ok(HealthState::Error),
            "timeout" => Ok(HealthState::Timeout),
            other => Err(format!("unknown health state: {other}")),
        }
    }
}

// ── Binding ───────────────────────────────────────────────────────

/// Default binding priority; lower values take precedence.
pub const DEFAULT_BINDING_PRIORITY: u32 = 10;

/// Association between an application and a Redis connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Binding {
    pub id: BindingId,
    pub application_id: ApplicationId,
    pub redis_connection_id: ConnectionId,
    pub is_primary: bool,
    pub priority: u32,
    pub active: bool,
    pub last_used_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Binding {
    /// A fresh, active, non-primary binding with the default priority.
    /// The id is assigned by the store on first write.
    pub fn new(application_id: ApplicationId, redis_connection_id: ConnectionId, now: u64) -> Self {
        Self {
            id: 0,
            application_id,
            redis_connection_id,
            is_primary: false,
            priority: DEFAULT_BINDING_PRIORITY,
            active: true,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn table_key(&self) -> String {
        binding_key(self.application_id, self.redis_connection_id)
    }
}

/// Composite key for the bindings table.
pub fn binding_key(application_id: ApplicationId, connection_id: ConnectionId) -> String {
    format!("{}:{}", id_key(application_id), id_key(connection_id))
}

// ── Queue configuration ───────────────────────────────────────────

/// A named queue with its processing priority (higher runs first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueName {
    pub name: String,
    pub priority: u32,
}

impl QueueName {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// How the worker supervisor balances processes across queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    #[default]
    Auto,
    Simple,
    RoundRobin,
}

impl fmt::Display for BalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceStrategy::Auto => write!(f, "auto"),
            BalanceStrategy::Simple => write!(f, "simple"),
            BalanceStrategy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

impl std::str::FromStr for BalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BalanceStrategy::Auto),
            "simple" => Ok(BalanceStrategy::Simple),
            "round-robin" | "round_robin" => Ok(BalanceStrategy::RoundRobin),
            other => Err(format!("unknown balance strategy: {other}")),
        }
    }
}

/// Stored background-worker settings for one (application, connection) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfiguration {
    pub id: QueueConfigId,
    pub application_id: ApplicationId,
    pub redis_connection_id: ConnectionId,
    /// Queues in declaration order.
    pub queue_names: Vec<QueueName>,
    pub balance_strategy: BalanceStrategy,
    pub min_processes: u32,
    pub max_processes: u32,
    pub tries: u32,
    /// Job timeout in seconds.
    pub timeout: u32,
    /// Memory limit per worker in megabytes.
    pub memory: u32,
    pub active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl QueueConfiguration {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

// ── Health log ────────────────────────────────────────────────────

/// Immutable record of a single probe outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthLog {
    pub id: HealthLogId,
    pub connection_id: ConnectionId,
    pub status: HealthState,
    pub latency_ms: Option<f64>,
    pub error_message: Option<String>,
    pub memory_used_mb: Option<u64>,
    pub connected_clients: Option<u64>,
    pub keys_count: Option<u64>,
    pub metadata: BTreeMap<String, String>,
    pub checked_at: u64,
}

impl HealthLog {
    /// A log with no measurements; the id is assigned when recorded.
    pub fn new(connection_id: ConnectionId, status: HealthState, checked_at: u64) -> Self {
        Self {
            id: 0,
            connection_id,
            status,
            latency_ms: None,
            error_message: None,
            memory_used_mb: None,
            connected_clients: None,
            keys_count: None,
            metadata: BTreeMap::new(),
            checked_at,
        }
    }

    pub fn table_key(&self) -> String {
        format!(
            "{}:{}:{}",
            id_key(self.connection_id),
            id_key(self.checked_at),
            id_key(self.id)
        )
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// Kind of entity an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Application,
    RedisConnection,
    Binding,
    QueueConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubject {
    pub kind: SubjectKind,
    pub id: u64,
}

/// What happened to the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Updated,
    Deleted,
    Restored,
    Custom(String),
}

/// Append-only record of a mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: AuditId,
    pub log_name: Option<String>,
    pub description: String,
    pub subject: Option<AuditSubject>,
    /// Operator responsible for the change, if known.
    pub causer: Option<String>,
    pub event: AuditEvent,
    pub properties: serde_json::Value,
    pub created_at: u64,
}

impl AuditEntry {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}
