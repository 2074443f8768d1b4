//! Stored queue configurations: per (application, connection) worker settings.

use tracing::info;

use redfleet_state::{
    ApplicationId, BalanceStrategy, ConnectionId, QueueConfigId, QueueConfiguration, QueueName,
    StateStore, SubjectKind,
};

use crate::audit::AuditTrail;
use crate::error::{RegistryError, RegistryResult};
use crate::validation::{Validator, WorkerLimits, validate_queue_names, validate_worker_limits};

pub const DEFAULT_MIN_PROCESSES: u32 = 1;
pub const DEFAULT_MAX_PROCESSES: u32 = 10;
pub const DEFAULT_TRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: u32 = 60;
pub const DEFAULT_MEMORY: u32 = 128;

/// Input for [`QueueConfigs::create`]; unset fields take the defaults.
#[derive(Debug, Clone)]
pub struct NewQueueConfig {
    pub application_id: ApplicationId,
    pub redis_connection_id: ConnectionId,
    pub queue_names: Vec<QueueName>,
    pub balance_strategy: Option<BalanceStrategy>,
    pub min_processes: Option<u32>,
    pub max_processes: Option<u32>,
    pub tries: Option<u32>,
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
    pub active: Option<bool>,
}

impl NewQueueConfig {
    pub fn new(application_id: ApplicationId, redis_connection_id: ConnectionId, queue_names: Vec<QueueName>) -> Self {
        Self {
            application_id,
            redis_connection_id,
            queue_names,
            balance_strategy: None,
            min_processes: None,
            max_processes: None,
            tries: None,
            timeout: None,
            memory: None,
            active: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueConfigPatch {
    pub queue_names: Option<Vec<QueueName>>,
    pub balance_strategy: Option<BalanceStrategy>,
    pub min_processes: Option<u32>,
    pub max_processes: Option<u32>,
    pub tries: Option<u32>,
    pub timeout: Option<u32>,
    pub memory: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct QueueConfigs {
    store: StateStore,
    audit: AuditTrail,
}

impl QueueConfigs {
    pub fn new(store: StateStore, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    pub fn get(&self, id: QueueConfigId) -> RegistryResult<QueueConfiguration> {
        self.store
            .get_queue_config(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("queue configuration {id}")))
    }

    pub fn list_for_application(&self, application_id: ApplicationId) -> RegistryResult<Vec<QueueConfiguration>> {
        Ok(self.store.list_queue_configs_for_application(application_id)?)
    }

    /// Validate and persist a new configuration. Nothing is written if any
    /// field is out of range or the connection is not bound to the
    /// application.
    pub fn create(&self, input: NewQueueConfig) -> RegistryResult<QueueConfiguration> {
        let now = redfleet_core::epoch_secs();
        let config = QueueConfiguration {
            id: 0,
            application_id: input.application_id,
            redis_connection_id: input.redis_connection_id,
            queue_names: input.queue_names,
            balance_strategy: input.balance_strategy.unwrap_or_default(),
            min_processes: input.min_processes.unwrap_or(DEFAULT_MIN_PROCESSES),
            max_processes: input.max_processes.unwrap_or(DEFAULT_MAX_PROCESSES),
            tries: input.tries.unwrap_or(DEFAULT_TRIES),
            timeout: input.timeout.unwrap_or(DEFAULT_TIMEOUT),
            memory: input.memory.unwrap_or(DEFAULT_MEMORY),
            active: input.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        validate(&config)?;
        self.ensure_bound(config.application_id, config.redis_connection_id)?;

        let config = self.store.insert_queue_config(config)?;
        self.audit.created(SubjectKind::QueueConfiguration, config.id, &config);
        info!(
            id = config.id,
            application_id = config.application_id,
            connection_id = config.redis_connection_id,
            "queue configuration created"
        );
        Ok(config)
    }

    pub fn update(&self, id: QueueConfigId, patch: QueueConfigPatch) -> RegistryResult<QueueConfiguration> {
        let old = self.get(id)?;
        let mut config = old.clone();
        if let Some(queue_names) = patch.queue_names {
            config.queue_names = queue_names;
        }
        if let Some(strategy) = patch.balance_strategy {
            config.balance_strategy = strategy;
        }
        if let Some(min) = patch.min_processes {
            config.min_processes = min;
        }
        if let Some(max) = patch.max_processes {
            config.max_processes = max;
        }
        if let Some(tries) = patch.tries {
            config.tries = tries;
        }
        if let Some(timeout) = patch.timeout {
            config.timeout = timeout;
        }
        if let Some(memory) = patch.memory {
            config.memory = memory;
        }
        if let Some(active) = patch.active {
            config.active = active;
        }
        validate(&config)?;
        config.updated_at = redfleet_core::epoch_secs();

        self.store.put_queue_config(&config)?;
        self.audit.updated(SubjectKind::QueueConfiguration, id, &old, &config);
        Ok(config)
    }

    pub fn set_active(&self, id: QueueConfigId, active: bool) -> RegistryResult<QueueConfiguration> {
        self.update(
            id,
            QueueConfigPatch {
                active: Some(active),
                ..Default::default()
            },
        )
    }

    pub fn delete(&self, id: QueueConfigId) -> RegistryResult<()> {
        let config = self.get(id)?;
        self.store.delete_queue_config(id)?;
        self.audit.deleted(SubjectKind::QueueConfiguration, id, &config, true);
        info!(id, "queue configuration deleted");
        Ok(())
    }

    fn ensure_bound(&self, application_id: ApplicationId, connection_id: ConnectionId) -> RegistryResult<()> {
        if self.store.get_application(application_id)?.is_none() {
            return Err(RegistryError::NotFound(format!("application {application_id}")));
        }
        if self.store.get_connection(connection_id)?.is_none() {
            return Err(RegistryError::NotFound(format!("redis connection {connection_id}")));
        }
        if self.store.get_binding(application_id, connection_id)?.is_none() {
            return Err(crate::error::ValidationError::single(
                "redis_connection_id",
                format!("connection {connection_id} is not bound to application {application_id}"),
            )
            .into());
        }
        Ok(())
    }
}

fn validate(config: &QueueConfiguration) -> RegistryResult<()> {
    let mut v = Validator::new();
    validate_queue_names(&mut v, &config.queue_names);
    validate_worker_limits(
        &mut v,
        &WorkerLimits {
            min_processes: config.min_processes,
            max_processes: config.max_processes,
            tries: config.tries,
            timeout: config.timeout,
            memory: config.memory,
        },
    );
    Ok(v.finish()?)
}
