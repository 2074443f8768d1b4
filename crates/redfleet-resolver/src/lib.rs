//! redfleet-resolver: derive worker launch specifications.
//!
//! [`WorkerConfigResolver::resolve`] combines a stored queue configuration
//! with its application and connection and either yields a [`WorkerSpec`]
//! or says why the worker must not start. It is a pure projection over the
//! current state: nothing is probed, cached, or written, and every call
//! re-reads the store.
//!
//! A configuration is resolvable only while all of these hold:
//!
//! 1. the configuration is active;
//! 2. its application is active and not deleted;
//! 3. its connection is active, not deleted, and last probed `healthy`.
//!
//! A connection that has never been probed (`unknown`) is not resolvable.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use redfleet_registry::{ConnectionRegistry, ConnectionTarget};
use redfleet_state::{
    ApplicationId, BalanceStrategy, ConnectionId, HealthState, QueueConfigId, QueueConfiguration,
    QueueName, StateError, StateStore,
};

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("queue configuration {0} is inactive")]
    ConfigurationInactive(QueueConfigId),

    #[error("application {0} is inactive")]
    ApplicationInactive(ApplicationId),

    #[error("connection {connection_id} is unavailable: {reason}")]
    ConnectionUnavailable {
        connection_id: ConnectionId,
        reason: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Everything a worker supervisor needs to launch workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSpec {
    pub queue_configuration_id: QueueConfigId,
    pub application: String,
    pub connection_name: String,
    pub connection_target: ConnectionTarget,
    /// Highest priority first; ties keep declaration order.
    pub queues: Vec<QueueName>,
    pub balance_strategy: BalanceStrategy,
    pub min_processes: u32,
    pub max_processes: u32,
    pub tries: u32,
    pub timeout: u32,
    pub memory_mb: u32,
}

impl WorkerSpec {
    /// Queue names joined in processing order, e.g. `high,default,low`.
    pub fn queue_list(&self) -> String {
        self.queues
            .iter()
            .map(|q| q.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Copy with the connection password masked.
    pub fn redacted(&self) -> Self {
        Self {
            connection_target: self.connection_target.redacted(),
            ..self.clone()
        }
    }
}

#[derive(Clone)]
pub struct WorkerConfigResolver {
    store: StateStore,
    connections: ConnectionRegistry,
}

impl WorkerConfigResolver {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self {
            store: connections.store().clone(),
            connections,
        }
    }

    /// Resolve a stored configuration by id.
    pub fn resolve(&self, id: QueueConfigId) -> ResolveResult<WorkerSpec> {
        let config = self
            .store
            .get_queue_config(id)?
            .ok_or_else(|| ResolveError::NotFound(format!("queue configuration {id}")))?;
        self.resolve_config(&config)
    }

    pub fn resolve_config(&self, config: &QueueConfiguration) -> ResolveResult<WorkerSpec> {
        if !config.active {
            return Err(ResolveError::ConfigurationInactive(config.id));
        }

        let app = self
            .store
            .get_application(config.application_id)?
            .ok_or_else(|| ResolveError::NotFound(format!("application {}", config.application_id)))?;
        if !app.active || app.is_deleted() {
            return Err(ResolveError::ApplicationInactive(app.id));
        }

        let conn_id = config.redis_connection_id;
        let conn = self
            .store
            .get_connection(conn_id)?
            .ok_or_else(|| ResolveError::NotFound(format!("redis connection {conn_id}")))?;
        let unavailable = |reason: String| ResolveError::ConnectionUnavailable {
            connection_id: conn_id,
            reason,
        };
        if conn.is_deleted() {
            return Err(unavailable("connection is deleted".to_string()));
        }
        if !conn.active {
            return Err(unavailable("connection is inactive".to_string()));
        }
        if conn.health != HealthState::Healthy {
            return Err(unavailable(format!("health is {}", conn.health)));
        }

        let target = self
            .connections
            .build_target(&conn)
            .map_err(|e| unavailable(format!("cannot build connection target: {e}")))?;

        let mut queues = config.queue_names.clone();
        // Stable: equal priorities keep declaration order.
        queues.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            config_id = config.id,
            application = %app.slug,
            connection = %conn.name,
            "worker spec resolved"
        );

        Ok(WorkerSpec {
            queue_configuration_id: config.id,
            application: app.slug,
            connection_name: conn.name,
            connection_target: target,
            queues,
            balance_strategy: config.balance_strategy,
            min_processes: config.min_processes,
            max_processes: config.max_processes,
            tries: config.tries,
            timeout: config.timeout,
            memory_mb: config.memory,
        })
    }

    /// Resolve every configuration of an application independently.
    pub fn resolve_for_application(
        &self,
        application_id: ApplicationId,
    ) -> ResolveResult<Vec<(QueueConfigId, ResolveResult<WorkerSpec>)>> {
        let mut configs = self.store.list_queue_configs_for_application(application_id)?;
        configs.sort_by_key(|c| c.id);
        Ok(configs
            .iter()
            .map(|config| (config.id, self.resolve_config(config)))
            .collect())
    }
}
