//! Connection registry: Redis endpoint definitions and their health state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use redfleet_state::{ConnectionId, HealthLog, HealthState, RedisConnection, StateStore, SubjectKind};
use redfleet_vault::CredentialVault;

use crate::audit::AuditTrail;
use crate::error::{RegistryError, RegistryResult};
use crate::target::{ConnectionTarget, PASSWORD_OPTION};
use crate::validation::{DATABASE_RANGE, PORT_RANGE, Validator};

pub const DEFAULT_ENVIRONMENT: &str = "production";
pub const DEFAULT_PORT: u32 = 6379;

const SECONDS_PER_DAY: u64 = 86_400;

/// Input for [`ConnectionRegistry::create`]. Port and database are taken
/// wide so out-of-range values are reported instead of truncated.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConnection {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default)]
    pub database: u32,
    /// Plaintext; sealed by the vault before it is stored.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewConnection {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            database: 0,
            password: None,
            options: BTreeMap::new(),
            active: true,
            environment: None,
            region: None,
            provider: None,
            notes: None,
        }
    }
}

fn default_port() -> u32 {
    DEFAULT_PORT
}

fn default_active() -> bool {
    true
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub database: Option<u32>,
    /// `Some(None)` clears the stored secret.
    pub password: Option<Option<String>>,
    pub options: Option<BTreeMap<String, String>>,
    pub active: Option<bool>,
    pub environment: Option<String>,
    pub region: Option<Option<String>>,
    pub provider: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    pub active: Option<bool>,
    pub health: Option<HealthState>,
    pub environment: Option<String>,
    pub include_deleted: bool,
}

impl ConnectionFilter {
    /// Active, non-deleted connections: the set the periodic prober checks.
    pub fn active() -> Self {
        Self {
            active: Some(true),
            ..Self::default()
        }
    }

    fn matches(&self, conn: &RedisConnection) -> bool {
        (self.include_deleted || !conn.is_deleted())
            && self.active.is_none_or(|a| conn.active == a)
            && self.health.is_none_or(|h| conn.health == h)
            && self
                .environment
                .as_deref()
                .is_none_or(|env| conn.environment == env)
    }
}

/// Health log query. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct HealthLogQuery {
    pub status: Option<HealthState>,
    /// Inclusive lower bound on `checked_at`.
    pub since: Option<u64>,
    /// Exclusive upper bound on `checked_at`.
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl HealthLogQuery {
    /// Logs from the last 24 hours.
    pub fn recent() -> Self {
        Self {
            since: Some(redfleet_core::epoch_secs().saturating_sub(SECONDS_PER_DAY)),
            ..Self::default()
        }
    }

    fn matches(&self, log: &HealthLog) -> bool {
        self.status.is_none_or(|s| log.status == s)
            && self.since.is_none_or(|since| log.checked_at >= since)
            && self.until.is_none_or(|until| log.checked_at < until)
    }
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    store: StateStore,
    vault: Arc<CredentialVault>,
    audit: AuditTrail,
}

impl ConnectionRegistry {
    pub fn new(store: StateStore, vault: Arc<CredentialVault>, audit: AuditTrail) -> Self {
        Self { store, vault, audit }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub fn vault_handle(&self) -> Arc<CredentialVault> {
        Arc::clone(&self.vault)
    }

    pub fn get(&self, id: ConnectionId) -> RegistryResult<RedisConnection> {
        self.store
            .get_connection(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("redis connection {id}")))
    }

    pub fn find_by_name(&self, name: &str) -> RegistryResult<Option<RedisConnection>> {
        Ok(self
            .store
            .list_connections()?
            .into_iter()
            .find(|c| c.name == name))
    }

    pub fn list(&self, filter: &ConnectionFilter) -> RegistryResult<Vec<RedisConnection>> {
        let mut conns: Vec<_> = self
            .store
            .list_connections()?
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect();
        conns.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(conns)
    }

    pub fn create(&self, mut input: NewConnection) -> RegistryResult<RedisConnection> {
        // A password given as an option is sealed like the typed one; the
        // typed field wins when both are set.
        let option_password = input.options.remove(PASSWORD_OPTION);
        let password = input.password.take().or(option_password);
        let environment = input
            .environment
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let mut v = Validator::new();
        v.require("name", &input.name);
        v.require("host", &input.host);
        v.require("environment", &environment);
        v.range("port", input.port.into(), PORT_RANGE);
        v.range("database", input.database.into(), DATABASE_RANGE);
        v.finish()?;

        let secret = self.seal(password.as_deref())?;
        let now = redfleet_core::epoch_secs();
        let conn = RedisConnection {
            id: 0,
            name: input.name.trim().to_string(),
            host: input.host.trim().to_string(),
            port: narrow(input.port, "port")?,
            database: narrow(input.database, "database")?,
            secret,
            options: input.options,
            active: input.active,
            health: HealthState::Unknown,
            last_checked_at: None,
            last_error: None,
            environment,
            region: input.region,
            provider: input.provider,
            notes: input.notes,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let conn = self.store.insert_connection(conn)?;
        self.audit.created(SubjectKind::RedisConnection, conn.id, &conn);
        info!(id = conn.id, name = %conn.name, host = %conn.host, "redis connection created");
        Ok(conn)
    }

    /// Apply `patch` to the stored row. Health fields are never touched;
    /// only a probe changes them.
    pub fn update(&self, id: ConnectionId, mut patch: ConnectionPatch) -> RegistryResult<RedisConnection> {
        let option_password = patch
            .options
            .as_mut()
            .and_then(|options| options.remove(PASSWORD_OPTION));
        let password = patch.password.take().or(option_password.map(Some));

        let mut v = Validator::new();
        if let Some(name) = &patch.name {
            v.require("name", name);
        }
        if let Some(host) = &patch.host {
            v.require("host", host);
        }
        if let Some(env) = &patch.environment {
            v.require("environment", env);
        }
        if let Some(port) = patch.port {
            v.range("port", port.into(), PORT_RANGE);
        }
        if let Some(database) = patch.database {
            v.range("database", database.into(), DATABASE_RANGE);
        }
        v.finish()?;

        let port: Option<u16> = patch.port.map(|p| narrow(p, "port")).transpose()?;
        let database: Option<u8> = patch.database.map(|d| narrow(d, "database")).transpose()?;
        let secret = password.map(|p| self.seal(p.as_deref())).transpose()?;
        let now = redfleet_core::epoch_secs();

        let (old, conn) = self.store.mutate_connection(id, |conn| {
            if let Some(name) = patch.name {
                conn.name = name.trim().to_string();
            }
            if let Some(host) = patch.host {
                conn.host = host.trim().to_string();
            }
            if let Some(port) = port {
                conn.port = port;
            }
            if let Some(database) = database {
                conn.database = database;
            }
            if let Some(secret) = secret {
                conn.secret = secret;
            }
            if let Some(options) = patch.options {
                conn.options = options;
            }
            if let Some(active) = patch.active {
                conn.active = active;
            }
            if let Some(env) = patch.environment {
                conn.environment = env;
            }
            if let Some(region) = patch.region {
                conn.region = region;
            }
            if let Some(provider) = patch.provider {
                conn.provider = provider;
            }
            if let Some(notes) = patch.notes {
                conn.notes = notes;
            }
            conn.updated_at = now;
        })?;

        self.audit.updated(SubjectKind::RedisConnection, id, &old, &conn);
        debug!(id, "redis connection updated");
        Ok(conn)
    }

    /// Mark a connection deleted. The row, its bindings, and its history stay.
    pub fn soft_delete(&self, id: ConnectionId) -> RegistryResult<RedisConnection> {
        let now = redfleet_core::epoch_secs();
        let (old, conn) = self.store.mutate_connection(id, |conn| {
            if !conn.is_deleted() {
                conn.deleted_at = Some(now);
                conn.updated_at = now;
            }
        })?;
        if !old.is_deleted() {
            self.audit.deleted(SubjectKind::RedisConnection, id, &conn, false);
            info!(id, name = %conn.name, "redis connection soft-deleted");
        }
        Ok(conn)
    }

    pub fn restore(&self, id: ConnectionId) -> RegistryResult<RedisConnection> {
        let now = redfleet_core::epoch_secs();
        let (old, conn) = self.store.mutate_connection(id, |conn| {
            if conn.is_deleted() {
                conn.deleted_at = None;
                conn.updated_at = now;
            }
        })?;
        if old.is_deleted() {
            self.audit.restored(SubjectKind::RedisConnection, id);
            info!(id, name = %conn.name, "redis connection restored");
        }
        Ok(conn)
    }

    /// Remove a connection with its bindings, queue configurations, and
    /// health logs.
    pub fn purge(&self, id: ConnectionId) -> RegistryResult<()> {
        let conn = self.get(id)?;
        self.store.delete_connection(id)?;
        self.audit.deleted(SubjectKind::RedisConnection, id, &conn, true);
        info!(id, name = %conn.name, "redis connection purged");
        Ok(())
    }

    /// Decrypt the secret and assemble a dialable target.
    pub fn build_target(&self, conn: &RedisConnection) -> RegistryResult<ConnectionTarget> {
        let password = self.vault.decrypt(conn.secret.as_deref())?;
        Ok(ConnectionTarget::build(conn, password))
    }

    pub fn health_logs(&self, id: ConnectionId, query: &HealthLogQuery) -> RegistryResult<Vec<HealthLog>> {
        let logs = self.store.list_health_logs(id, usize::MAX)?;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(logs
            .into_iter()
            .filter(|log| query.matches(log))
            .take(limit)
            .collect())
    }

    fn seal(&self, password: Option<&str>) -> RegistryResult<Option<String>> {
        match password {
            Some(p) if !p.is_empty() => Ok(Some(self.vault.encrypt(p)?)),
            _ => Ok(None),
        }
    }
}

/// Convert a validated wide value to its column type.
fn narrow<T: TryFrom<u32>>(value: u32, field: &str) -> RegistryResult<T> {
    T::try_from(value).map_err(|_| {
        crate::error::ValidationError::single(field, format!("{value} is out of range")).into()
    })
}
