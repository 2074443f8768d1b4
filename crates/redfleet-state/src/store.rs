//! StateStore: redb-backed persistence for the connection fleet.
//!
//! Provides typed CRUD operations over applications, connections, bindings,
//! queue configurations, health logs, and audit entries. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.open_table(CONNECTIONS).map_err(map_err!(Table))?;
        txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        txn.open_table(QUEUE_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_LOGS).map_err(map_err!(Table))?;
        txn.open_table(AUDIT_LOG).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_value<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Read every value in `def`, or only those under `prefix` (which must end in `:`).
    fn scan_values<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        prefix: Option<&str>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        match prefix {
            Some(prefix) => {
                let end = prefix_end(prefix);
                for entry in table.range(prefix..end.as_str()).map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    results.push(decode(value.value())?);
                }
            }
            None => {
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    results.push(decode(value.value())?);
                }
            }
        }
        Ok(results)
    }

    // ── Applications ───────────────────────────────────────────────

    /// Insert a new application, assigning its id. Slugs must be unique.
    pub fn insert_application(&self, mut app: Application) -> StateResult<Application> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        ensure_unique_slug(&txn, &app.slug, None)?;
        app.id = allocate_id(&txn, "applications")?;
        write_in(&txn, APPLICATIONS, &app.table_key(), &app)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = app.id, slug = %app.slug, "application stored");
        Ok(app)
    }

    /// Update an existing application in place.
    pub fn put_application(&self, app: &Application) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = app.table_key();
        if read_in::<Application>(&txn, APPLICATIONS, &key)?.is_none() {
            return Err(StateError::NotFound(format!("application {}", app.id)));
        }
        ensure_unique_slug(&txn, &app.slug, Some(app.id))?;
        write_in(&txn, APPLICATIONS, &key, app)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_application(&self, id: ApplicationId) -> StateResult<Option<Application>> {
        self.get_value(APPLICATIONS, &id_key(id))
    }

    pub fn get_application_by_slug(&self, slug: &str) -> StateResult<Option<Application>> {
        Ok(self
            .list_applications()?
            .into_iter()
            .find(|app| app.slug == slug))
    }

    /// List all applications, including soft-deleted ones.
    pub fn list_applications(&self) -> StateResult<Vec<Application>> {
        self.scan_values(APPLICATIONS, None)
    }

    /// Purge an application together with its bindings and queue
    /// configurations. Returns true if it existed.
    pub fn delete_application(&self, id: ApplicationId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = remove_in(&txn, APPLICATIONS, &id_key(id))?;

        let prefix = format!("{}:", id_key(id));
        let bindings: Vec<Binding> = scan_in(&txn, BINDINGS, Some(&prefix))?;
        for binding in &bindings {
            remove_in(&txn, BINDINGS, &binding.table_key())?;
        }

        let configs: Vec<QueueConfiguration> = scan_in(&txn, QUEUE_CONFIGS, None)?;
        let mut removed_configs = 0;
        for config in configs.iter().filter(|c| c.application_id == id) {
            remove_in(&txn, QUEUE_CONFIGS, &config.table_key())?;
            removed_configs += 1;
        }

        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            id,
            existed,
            bindings = bindings.len(),
            queue_configs = removed_configs,
            "application purged"
        );
        Ok(existed)
    }

    // ── Connections ────────────────────────────────────────────────

    /// Insert a new connection, assigning its id. Names must be unique.
    pub fn insert_connection(&self, mut conn: RedisConnection) -> StateResult<RedisConnection> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        ensure_unique_connection_name(&txn, &conn.name, None)?;
        conn.id = allocate_id(&txn, "redis_connections")?;
        write_in(&txn, CONNECTIONS, &conn.table_key(), &conn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = conn.id, name = %conn.name, "connection stored");
        Ok(conn)
    }

    /// Update an existing connection in place.
    pub fn put_connection(&self, conn: &RedisConnection) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = conn.table_key();
        if read_in::<RedisConnection>(&txn, CONNECTIONS, &key)?.is_none() {
            return Err(StateError::NotFound(format!("redis connection {}", conn.id)));
        }
        ensure_unique_connection_name(&txn, &conn.name, Some(conn.id))?;
        write_in(&txn, CONNECTIONS, &key, conn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Apply `f` to the stored connection and write it back in one
    /// transaction, so a concurrent [`StateStore::record_probe`] is never
    /// overwritten with a stale copy. Health fields belong to probes and are
    /// carried over from the stored row whatever `f` does. Returns the row
    /// before and after; nothing is written when `f` changes nothing.
    pub fn mutate_connection(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut RedisConnection),
    ) -> StateResult<(RedisConnection, RedisConnection)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = id_key(id);
        let old: RedisConnection = read_in(&txn, CONNECTIONS, &key)?
            .ok_or_else(|| StateError::NotFound(format!("redis connection {id}")))?;

        let mut conn = old.clone();
        f(&mut conn);
        conn.id = old.id;
        conn.health = old.health;
        conn.last_checked_at = old.last_checked_at;
        conn.last_error = old.last_error.clone();

        if conn == old {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok((old, conn));
        }
        if conn.name != old.name {
            ensure_unique_connection_name(&txn, &conn.name, Some(id))?;
        }
        write_in(&txn, CONNECTIONS, &key, &conn)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, "connection mutated");
        Ok((old, conn))
    }

    pub fn get_connection(&self, id: ConnectionId) -> StateResult<Option<RedisConnection>> {
        self.get_value(CONNECTIONS, &id_key(id))
    }

    /// List all connections, including soft-deleted ones.
    pub fn list_connections(&self) -> StateResult<Vec<RedisConnection>> {
        self.scan_values(CONNECTIONS, None)
    }

    /// Purge a connection together with its bindings, queue configurations,
    /// and health logs. Returns true if it existed.
    pub fn delete_connection(&self, id: ConnectionId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = remove_in(&txn, CONNECTIONS, &id_key(id))?;

        let bindings: Vec<Binding> = scan_in(&txn, BINDINGS, None)?;
        for binding in bindings.iter().filter(|b| b.redis_connection_id == id) {
            remove_in(&txn, BINDINGS, &binding.table_key())?;
        }

        let configs: Vec<QueueConfiguration> = scan_in(&txn, QUEUE_CONFIGS, None)?;
        for config in configs.iter().filter(|c| c.redis_connection_id == id) {
            remove_in(&txn, QUEUE_CONFIGS, &config.table_key())?;
        }

        let prefix = format!("{}:", id_key(id));
        let logs: Vec<HealthLog> = scan_in(&txn, HEALTH_LOGS, Some(&prefix))?;
        for log in &logs {
            remove_in(&txn, HEALTH_LOGS, &log.table_key())?;
        }

        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, existed, health_logs = logs.len(), "connection purged");
        Ok(existed)
    }

    /// Append a probe outcome and apply it to the connection's health fields
    /// in one transaction. Returns the stored log with its id assigned.
    pub fn record_probe(&self, log: &HealthLog) -> StateResult<HealthLog> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let conn_key = id_key(log.connection_id);
        let mut conn: RedisConnection = read_in(&txn, CONNECTIONS, &conn_key)?.ok_or_else(|| {
            StateError::NotFound(format!("redis connection {}", log.connection_id))
        })?;

        let mut log = log.clone();
        log.id = allocate_id(&txn, "health_logs")?;
        write_in(&txn, HEALTH_LOGS, &log.table_key(), &log)?;

        conn.health = log.status;
        conn.last_checked_at = Some(log.checked_at);
        conn.last_error = if log.is_healthy() {
            None
        } else {
            log.error_message.clone()
        };
        write_in(&txn, CONNECTIONS, &conn_key, &conn)?;

        txn.commit().map_err(map_err!(Transaction))?;
        debug!(connection_id = log.connection_id, status = %log.status, "probe recorded");
        Ok(log)
    }

    // ── Health logs ────────────────────────────────────────────────

    /// Most recent health logs for a connection, newest first.
    pub fn list_health_logs(&self, connection_id: ConnectionId, limit: usize) -> StateResult<Vec<HealthLog>> {
        let prefix = format!("{}:", id_key(connection_id));
        let end = prefix_end(&prefix);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEALTH_LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(prefix.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Every health log in the store, ordered by connection then time.
    pub fn list_all_health_logs(&self) -> StateResult<Vec<HealthLog>> {
        self.scan_values(HEALTH_LOGS, None)
    }

    // ── Bindings ───────────────────────────────────────────────────

    pub fn get_binding(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
    ) -> StateResult<Option<Binding>> {
        self.get_value(BINDINGS, &binding_key(application_id, connection_id))
    }

    pub fn list_bindings_for_application(&self, application_id: ApplicationId) -> StateResult<Vec<Binding>> {
        let prefix = format!("{}:", id_key(application_id));
        self.scan_values(BINDINGS, Some(&prefix))
    }

    pub fn list_bindings_for_connection(&self, connection_id: ConnectionId) -> StateResult<Vec<Binding>> {
        Ok(self
            .scan_values::<Binding>(BINDINGS, None)?
            .into_iter()
            .filter(|b| b.redis_connection_id == connection_id)
            .collect())
    }

    /// Rewrite an application's binding set atomically.
    ///
    /// `f` receives every binding of the application and may edit, add, or
    /// remove entries. New bindings (id `0`) get an id assigned. If `f`
    /// returns an error nothing is written. Returns `f`'s value and the final
    /// binding set.
    pub fn mutate_bindings<R>(
        &self,
        application_id: ApplicationId,
        f: impl FnOnce(&mut Vec<Binding>) -> StateResult<R>,
    ) -> StateResult<(R, Vec<Binding>)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let prefix = format!("{}:", id_key(application_id));
        let before: Vec<Binding> = scan_in(&txn, BINDINGS, Some(&prefix))?;

        let mut bindings = before.clone();
        let result = match f(&mut bindings) {
            Ok(result) => result,
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                return Err(e);
            }
        };

        let mut seen = HashSet::new();
        for binding in &bindings {
            if binding.application_id != application_id {
                return Err(StateError::Conflict(format!(
                    "binding for application {} in set of application {application_id}",
                    binding.application_id
                )));
            }
            if !seen.insert(binding.redis_connection_id) {
                return Err(StateError::Conflict(format!(
                    "duplicate binding {application_id}:{}",
                    binding.redis_connection_id
                )));
            }
        }

        for old in &before {
            if !seen.contains(&old.redis_connection_id) {
                remove_in(&txn, BINDINGS, &old.table_key())?;
            }
        }

        for binding in bindings.iter_mut() {
            if binding.id == 0 {
                binding.id = allocate_id(&txn, "bindings")?;
            }
            let unchanged = before.iter().any(|old| old == binding);
            if !unchanged {
                write_in(&txn, BINDINGS, &binding.table_key(), binding)?;
            }
        }

        txn.commit().map_err(map_err!(Transaction))?;
        debug!(application_id, bindings = bindings.len(), "binding set written");
        Ok((result, bindings))
    }

    /// Set `last_used_at` on a binding. Returns false if the binding is gone.
    pub fn touch_binding(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
        now: u64,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = binding_key(application_id, connection_id);
        let Some(mut binding) = read_in::<Binding>(&txn, BINDINGS, &key)? else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(false);
        };
        binding.last_used_at = Some(now);
        write_in(&txn, BINDINGS, &key, &binding)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    // ── Queue configurations ───────────────────────────────────────

    /// Insert a queue configuration, assigning its id. At most one
    /// configuration may exist per (application, connection) pair.
    pub fn insert_queue_config(&self, mut config: QueueConfiguration) -> StateResult<QueueConfiguration> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing: Vec<QueueConfiguration> = scan_in(&txn, QUEUE_CONFIGS, None)?;
        if existing.iter().any(|c| {
            c.application_id == config.application_id
                && c.redis_connection_id == config.redis_connection_id
        }) {
            return Err(StateError::Conflict(format!(
                "queue configuration for application {} on connection {} already exists",
                config.application_id, config.redis_connection_id
            )));
        }
        config.id = allocate_id(&txn, "queue_configurations")?;
        write_in(&txn, QUEUE_CONFIGS, &config.table_key(), &config)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = config.id, application_id = config.application_id, "queue configuration stored");
        Ok(config)
    }

    /// Update an existing queue configuration in place.
    pub fn put_queue_config(&self, config: &QueueConfiguration) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let key = config.table_key();
        if read_in::<QueueConfiguration>(&txn, QUEUE_CONFIGS, &key)?.is_none() {
            return Err(StateError::NotFound(format!("queue configuration {}", config.id)));
        }
        write_in(&txn, QUEUE_CONFIGS, &key, config)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_queue_config(&self, id: QueueConfigId) -> StateResult<Option<QueueConfiguration>> {
        self.get_value(QUEUE_CONFIGS, &id_key(id))
    }

    pub fn list_queue_configs(&self) -> StateResult<Vec<QueueConfiguration>> {
        self.scan_values(QUEUE_CONFIGS, None)
    }

    pub fn list_queue_configs_for_application(
        &self,
        application_id: ApplicationId,
    ) -> StateResult<Vec<QueueConfiguration>> {
        Ok(self
            .list_queue_configs()?
            .into_iter()
            .filter(|c| c.application_id == application_id)
            .collect())
    }

    /// Delete a queue configuration. Returns true if it existed.
    pub fn delete_queue_config(&self, id: QueueConfigId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = remove_in(&txn, QUEUE_CONFIGS, &id_key(id))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, existed, "queue configuration deleted");
        Ok(existed)
    }

    // ── Audit ──────────────────────────────────────────────────────

    /// Append an audit entry, assigning its id.
    pub fn append_audit(&self, mut entry: AuditEntry) -> StateResult<AuditEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        entry.id = allocate_id(&txn, "audit_log")?;
        write_in(&txn, AUDIT_LOG, &entry.table_key(), &entry)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(entry)
    }

    /// All audit entries, oldest first.
    pub fn list_audit(&self) -> StateResult<Vec<AuditEntry>> {
        self.scan_values(AUDIT_LOG, None)
    }
}

// ── Transaction-scoped helpers ─────────────────────────────────────

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Bump and return the next id of `sequence`.
fn allocate_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn read_in<T: DeserializeOwned>(txn: &WriteTransaction, def: JsonTable, key: &str) -> StateResult<Option<T>> {
    let table = txn.open_table(def).map_err(map_err!(Table))?;
    let bytes = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec());
    bytes.map(|b| decode(&b)).transpose()
}

fn scan_in<T: DeserializeOwned>(
    txn: &WriteTransaction,
    def: JsonTable,
    prefix: Option<&str>,
) -> StateResult<Vec<T>> {
    let table = txn.open_table(def).map_err(map_err!(Table))?;
    let mut results = Vec::new();
    let end = prefix.map(prefix_end);
    let range = match (prefix, end.as_deref()) {
        (Some(start), Some(end)) => table.range(start..end).map_err(map_err!(Read))?,
        _ => table.iter().map_err(map_err!(Read))?,
    };
    for entry in range {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

fn write_in<T: Serialize>(txn: &WriteTransaction, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
    let bytes = encode(value)?;
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn remove_in(txn: &WriteTransaction, def: JsonTable, key: &str) -> StateResult<bool> {
    let mut table = txn.open_table(def).map_err(map_err!(Table))?;
    let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
    Ok(existed)
}

fn ensure_unique_slug(txn: &WriteTransaction, slug: &str, own_id: Option<ApplicationId>) -> StateResult<()> {
    let apps: Vec<Application> = scan_in(txn, APPLICATIONS, None)?;
    if apps
        .iter()
        .any(|app| app.slug == slug && Some(app.id) != own_id)
    {
        return Err(StateError::Conflict(format!("application slug '{slug}' is taken")));
    }
    Ok(())
}

fn ensure_unique_connection_name(
    txn: &WriteTransaction,
    name: &str,
    own_id: Option<ConnectionId>,
) -> StateResult<()> {
    let conns: Vec<RedisConnection> = scan_in(txn, CONNECTIONS, None)?;
    if conns
        .iter()
        .any(|conn| conn.name == name && Some(conn.id) != own_id)
    {
        return Err(StateError::Conflict(format!("connection name '{name}' is taken")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_application(slug: &str) -> Application {
        Application {
            id: 0,
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            description: None,
            color: "gray".to_string(),
            icon: None,
            active: true,
            metadata: BTreeMap::new(),
            created_at: 1000,
            updated_at: 1000,
            deleted_at: None,
        }
    }

    fn test_connection(name: &str) -> RedisConnection {
        RedisConnection {
            id: 0,
            name: name.to_string(),
            host: "10.0.0.1".to_string(),
            port: 6379,
            database: 0,
            secret: None,
            options: BTreeMap::new(),
            active: true,
            health: HealthState::Unknown,
            last_checked_at: None,
            last_error: None,
            environment: "production".to_string(),
            region: None,
            provider: None,
            notes: None,
            created_at: 1000,
            updated_at: 1000,
            deleted_at: None,
        }
    }

    fn test_queue_config(app: ApplicationId, conn: ConnectionId) -> QueueConfiguration {
        QueueConfiguration {
            id: 0,
            application_id: app,
            redis_connection_id: conn,
            queue_names: vec![QueueName::new("default", 1)],
            balance_strategy: BalanceStrategy::Auto,
            min_processes: 1,
            max_processes: 10,
            tries: 3,
            timeout: 60,
            memory: 128,
            active: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    // ── Applications ───────────────────────────────────────────────

    #[test]
    fn application_insert_assigns_sequential_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.insert_application(test_application("billing")).unwrap();
        let b = store.insert_application(test_application("search")).unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.get_application(1).unwrap(), Some(a));
    }

    #[test]
    fn application_slug_must_be_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_application(test_application("billing")).unwrap();

        let err = store.insert_application(test_application("billing")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn application_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut app = store.insert_application(test_application("billing")).unwrap();

        app.name = "Billing Service".to_string();
        app.updated_at = 2000;
        store.put_application(&app).unwrap();

        let retrieved = store.get_application_by_slug("billing").unwrap().unwrap();
        assert_eq!(retrieved.name, "Billing Service");
        assert_eq!(retrieved.updated_at, 2000);
    }

    #[test]
    fn application_update_rejects_taken_slug() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_application(test_application("billing")).unwrap();
        let mut other = store.insert_application(test_application("search")).unwrap();

        other.slug = "billing".to_string();
        assert!(matches!(store.put_application(&other), Err(StateError::Conflict(_))));
    }

    #[test]
    fn application_put_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let mut app = test_application("ghost");
        app.id = 42;
        assert!(matches!(store.put_application(&app), Err(StateError::NotFound(_))));
    }

    #[test]
    fn application_purge_cascades() {
        let store = StateStore::open_in_memory().unwrap();
        let app = store.insert_application(test_application("billing")).unwrap();
        let other = store.insert_application(test_application("search")).unwrap();
        let conn = store.insert_connection(test_connection("cache-1")).unwrap();

        for app_id in [app.id, other.id] {
            store
                .mutate_bindings(app_id, |set| {
                    set.push(Binding::new(app_id, conn.id, 1000));
                    Ok(())
                })
                .unwrap();
            store.insert_queue_config(test_queue_config(app_id, conn.id)).unwrap();
        }

        assert!(store.delete_application(app.id).unwrap());
        assert!(store.get_application(app.id).unwrap().is_none());
        assert!(store.list_bindings_for_application(app.id).unwrap().is_empty());
        assert!(store.list_queue_configs_for_application(app.id).unwrap().is_empty());

        // Other application untouched.
        assert_eq!(store.list_bindings_for_application(other.id).unwrap().len(), 1);
        assert_eq!(store.list_queue_configs_for_application(other.id).unwrap().len(), 1);
        assert!(!store.delete_application(app.id).unwrap());
    }

    // ── Connections ────────────────────────────────────────────────

    #[test]
    fn connection_name_must_be_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_connection(test_connection("cache-1")).unwrap();
        assert!(matches!(
            store.insert_connection(test_connection("cache-1")),
            Err(StateError::Conflict(_))
        ));
    }

    #[test]
    fn connection_purge_cascades_to_bindings_configs_and_logs() {
        let store = StateStore::open_in_memory().unwrap();
        let app = store.insert_application(test_application("billing")).unwrap();
        let doomed = store.insert_connection(test_connection("cache-1")).unwrap();
        let kept = store.insert_connection(test_connection("cache-2")).unwrap();

        store
            .mutate_bindings(app.id, |set| {
                set.push(Binding::new(app.id, doomed.id, 1000));
                set.push(Binding::new(app.id, kept.id, 1000));
                Ok(())
            })
            .unwrap();
        store.insert_queue_config(test_queue_config(app.id, doomed.id)).unwrap();
        store
            .record_probe(&HealthLog::new(doomed.id, HealthState::Healthy, 1100))
            .unwrap();
        store
            .record_probe(&HealthLog::new(kept.id, HealthState::Healthy, 1100))
            .unwrap();

        assert!(store.delete_connection(doomed.id).unwrap());

        let remaining = store.list_bindings_for_application(app.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].redis_connection_id, kept.id);
        assert!(store.list_queue_configs().unwrap().is_empty());
        assert!(store.list_health_logs(doomed.id, 10).unwrap().is_empty());
        assert_eq!(store.list_health_logs(kept.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn record_probe_updates_health_fields() {
        let store = StateStore::open_in_memory().unwrap();
        let conn = store.insert_connection(test_connection("cache-1")).unwrap();

        let mut failed = HealthLog::new(conn.id, HealthState::Error, 1100);
        failed.error_message = Some("connection refused".to_string());
        let stored = store.record_probe(&failed).unwrap();
        assert_eq!(stored.id, 1);

        let after = store.get_connection(conn.id).unwrap().unwrap();
        assert_eq!(after.health, HealthState::Error);
        assert_eq!(after.last_checked_at, Some(1100));
        assert_eq!(after.last_error.as_deref(), Some("connection refused"));

        let mut ok = HealthLog::new(conn.id, HealthState::Healthy, 1200);
        ok.latency_ms = Some(0.4);
        store.record_probe(&ok).unwrap();

        let after = store.get_connection(conn.id).unwrap().unwrap();
        assert_eq!(after.health, HealthState::Healthy);
        assert_eq!(after.last_checked_at, Some(1200));
        assert!(after.last_error.is_none());
    }

    #[test]
    fn mutate_connection_keeps_health_recorded_since_the_caller_read() {
        let store = StateStore::open_in_memory().unwrap();
        let conn = store.insert_connection(test_connection("cache-1")).unwrap();
        let stale = store.get_connection(conn.id).unwrap().unwrap();

        store
            .record_probe(&HealthLog::new(conn.id, HealthState::Healthy, 1100))
            .unwrap();

        let (before, after) = store
            .mutate_connection(conn.id, |c| {
                // A caller replaying a stale copy cannot roll health back.
                *c = RedisConnection {
                    name: "cache-renamed".to_string(),
                    ..stale.clone()
                };
            })
            .unwrap();

        assert_eq!(before.health, HealthState::Healthy);
        assert_eq!(after.name, "cache-renamed");
        let stored = store.get_connection(conn.id).unwrap().unwrap();
        assert_eq!(stored.name, "cache-renamed");
        assert_eq!(stored.health, HealthState::Healthy);
        assert_eq!(stored.last_checked_at, Some(1100));
    }

    #[test]
    fn mutate_connection_rejects_taken_name_and_missing_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_connection(test_connection("cache-1")).unwrap();
        let other = store.insert_connection(test_connection("cache-2")).unwrap();

        let renamed = store.mutate_connection(other.id, |c| c.name = "cache-1".to_string());
        assert!(matches!(renamed, Err(StateError::Conflict(_))));
        assert_eq!(store.get_connection(other.id).unwrap().unwrap().name, "cache-2");

        let missing = store.mutate_connection(99, |c| c.active = false);
        assert!(matches!(missing, Err(StateError::NotFound(_))));
    }

    #[test]
    fn record_probe_for_missing_connection_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.record_probe(&HealthLog::new(99, HealthState::Healthy, 1));
        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert!(store.list_all_health_logs().unwrap().is_empty());
    }

    #[test]
    fn health_logs_are_listed_newest_first_with_limit() {
        let store = StateStore::open_in_memory().unwrap();
        let conn = store.insert_connection(test_connection("cache-1")).unwrap();
        for at in [1000u64, 3000, 2000] {
            store
                .record_probe(&HealthLog::new(conn.id, HealthState::Healthy, at))
                .unwrap();
        }

        let logs = store.list_health_logs(conn.id, 10).unwrap();
        let times: Vec<u64> = logs.iter().map(|l| l.checked_at).collect();
        assert_eq!(times, vec![3000, 2000, 1000]);

        let limited = store.list_health_logs(conn.id, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].checked_at, 3000);
    }

    // ── Bindings ───────────────────────────────────────────────────

    #[test]
    fn mutate_bindings_assigns_ids_and_removes_dropped_rows() {
        let store = StateStore::open_in_memory().unwrap();
        let (_, set) = store
            .mutate_bindings(1, |set| {
                set.push(Binding::new(1, 10, 1000));
                set.push(Binding::new(1, 11, 1000));
                Ok(())
            })
            .unwrap();
        assert!(set.iter().all(|b| b.id > 0));
        assert_eq!(store.list_bindings_for_application(1).unwrap().len(), 2);

        store
            .mutate_bindings(1, |set| {
                set.retain(|b| b.redis_connection_id != 10);
                Ok(())
            })
            .unwrap();
        let remaining = store.list_bindings_for_application(1).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].redis_connection_id, 11);
    }

    #[test]
    fn mutate_bindings_error_writes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let result: StateResult<((), Vec<Binding>)> = store.mutate_bindings(1, |set| {
            set.push(Binding::new(1, 10, 1000));
            Err(StateError::NotFound("connection 10".to_string()))
        });
        assert!(result.is_err());
        assert!(store.list_bindings_for_application(1).unwrap().is_empty());
    }

    #[test]
    fn mutate_bindings_rejects_duplicates_and_foreign_rows() {
        let store = StateStore::open_in_memory().unwrap();
        let dup = store.mutate_bindings(1, |set| {
            set.push(Binding::new(1, 10, 1000));
            set.push(Binding::new(1, 10, 1000));
            Ok(())
        });
        assert!(matches!(dup, Err(StateError::Conflict(_))));

        let foreign = store.mutate_bindings(1, |set| {
            set.push(Binding::new(2, 10, 1000));
            Ok(())
        });
        assert!(matches!(foreign, Err(StateError::Conflict(_))));
        assert!(store.list_bindings_for_application(1).unwrap().is_empty());
    }

    #[test]
    fn bindings_listed_per_connection() {
        let store = StateStore::open_in_memory().unwrap();
        for app in [1u64, 2, 3] {
            store
                .mutate_bindings(app, |set| {
                    set.push(Binding::new(app, 10, 1000));
                    if app == 3 {
                        set.push(Binding::new(app, 11, 1000));
                    }
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(store.list_bindings_for_connection(10).unwrap().len(), 3);
        assert_eq!(store.list_bindings_for_connection(11).unwrap().len(), 1);
    }

    #[test]
    fn touch_binding_sets_last_used() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .mutate_bindings(1, |set| {
                set.push(Binding::new(1, 10, 1000));
                Ok(())
            })
            .unwrap();

        assert!(store.touch_binding(1, 10, 5000).unwrap());
        assert_eq!(store.get_binding(1, 10).unwrap().unwrap().last_used_at, Some(5000));
        assert!(!store.touch_binding(1, 99, 5000).unwrap());
    }

    // ── Queue configurations ───────────────────────────────────────

    #[test]
    fn queue_config_pair_is_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_queue_config(test_queue_config(1, 10)).unwrap();
        assert!(matches!(
            store.insert_queue_config(test_queue_config(1, 10)),
            Err(StateError::Conflict(_))
        ));
        store.insert_queue_config(test_queue_config(1, 11)).unwrap();
        assert_eq!(store.list_queue_configs_for_application(1).unwrap().len(), 2);
    }

    #[test]
    fn queue_config_update_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let mut config = store.insert_queue_config(test_queue_config(1, 10)).unwrap();

        config.max_processes = 20;
        store.put_queue_config(&config).unwrap();
        assert_eq!(store.get_queue_config(config.id).unwrap().unwrap().max_processes, 20);

        assert!(store.delete_queue_config(config.id).unwrap());
        assert!(!store.delete_queue_config(config.id).unwrap());
        assert!(matches!(store.put_queue_config(&config), Err(StateError::NotFound(_))));
    }

    // ── Audit ──────────────────────────────────────────────────────

    #[test]
    fn audit_entries_append_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        for event in [AuditEvent::Created, AuditEvent::Updated] {
            store
                .append_audit(AuditEntry {
                    id: 0,
                    log_name: Some("fleet".to_string()),
                    description: format!("{event:?}"),
                    subject: Some(AuditSubject {
                        kind: SubjectKind::Application,
                        id: 1,
                    }),
                    causer: None,
                    event,
                    properties: serde_json::json!({}),
                    created_at: 1000,
                })
                .unwrap();
        }
        let entries = store.list_audit().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, AuditEvent::Created);
        assert_eq!(entries[1].id, 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_connection(test_connection("cache-1")).unwrap();
        }

        // Reopen the same database file; sequences continue.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_connections().unwrap().len(), 1);
        let next = store.insert_connection(test_connection("cache-2")).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_applications().unwrap().is_empty());
        assert!(store.list_connections().unwrap().is_empty());
        assert!(store.list_bindings_for_application(1).unwrap().is_empty());
        assert!(store.list_health_logs(1, 10).unwrap().is_empty());
        assert!(store.list_audit().unwrap().is_empty());
        assert!(!store.delete_application(1).unwrap());
        assert!(!store.delete_connection(1).unwrap());
        assert!(store.get_application_by_slug("nope").unwrap().is_none());
    }
}
