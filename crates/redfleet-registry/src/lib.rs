//! redfleet-registry: the write side of the connection fleet.
//!
//! Wraps the [`StateStore`] with validation, vault sealing, and auditing:
//!
//! - [`ApplicationRegistry`]: tenant applications.
//! - [`ConnectionRegistry`]: Redis endpoints, connection targets, health logs.
//! - [`FleetBinding`]: application ↔ connection bindings and resolution.
//! - [`QueueConfigs`]: stored worker settings.
//! - [`AuditTrail`]: append-only mutation history.
//!
//! [`Fleet`] bundles all of them over one store and one acting operator.

pub mod applications;
pub mod audit;
pub mod binding;
pub mod connections;
pub mod error;
pub mod queues;
pub mod target;
pub mod validation;

use std::sync::Arc;

use redfleet_state::StateStore;
use redfleet_vault::CredentialVault;

pub use applications::{ApplicationPatch, ApplicationRegistry, NewApplication};
pub use audit::AuditTrail;
pub use binding::{AttachOptions, FleetBinding};
pub use connections::{ConnectionFilter, ConnectionPatch, ConnectionRegistry, HealthLogQuery, NewConnection};
pub use error::{FieldError, RegistryError, RegistryResult, ValidationError};
pub use queues::{NewQueueConfig, QueueConfigPatch, QueueConfigs};
pub use target::ConnectionTarget;

/// Every registry over one store, attributed to one operator.
#[derive(Clone)]
pub struct Fleet {
    pub applications: ApplicationRegistry,
    pub connections: ConnectionRegistry,
    pub bindings: FleetBinding,
    pub queues: QueueConfigs,
    pub audit: AuditTrail,
}

impl Fleet {
    pub fn new(store: StateStore, vault: Arc<CredentialVault>) -> Self {
        Self::with_audit(store.clone(), vault, AuditTrail::new(store))
    }

    /// Registries whose audit entries name `causer`.
    pub fn acting_as(&self, causer: impl Into<String>) -> Self {
        let audit = self.audit.acting_as(causer);
        Self::with_audit(
            self.connections.store().clone(),
            self.vault_handle(),
            audit,
        )
    }

    fn with_audit(store: StateStore, vault: Arc<CredentialVault>, audit: AuditTrail) -> Self {
        Self {
            applications: ApplicationRegistry::new(store.clone(), audit.clone()),
            connections: ConnectionRegistry::new(store.clone(), vault, audit.clone()),
            bindings: FleetBinding::new(store.clone(), audit.clone()),
            queues: QueueConfigs::new(store, audit.clone()),
            audit,
        }
    }

    fn vault_handle(&self) -> Arc<CredentialVault> {
        self.connections.vault_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redfleet_state::QueueName;
    use redfleet_vault::KEY_LEN;

    #[test]
    fn acting_as_attributes_every_registry() {
        let store = StateStore::open_in_memory().unwrap();
        let vault = Arc::new(CredentialVault::new(&[4u8; KEY_LEN]).unwrap());
        let fleet = Fleet::new(store, vault).acting_as("deploy-bot");

        let app = fleet
            .applications
            .create(NewApplication::new("billing", "Billing"))
            .unwrap();
        let conn = fleet
            .connections
            .create(NewConnection::new("cache", "127.0.0.1"))
            .unwrap();
        fleet.bindings.set_primary(app.id, conn.id).unwrap();
        fleet
            .queues
            .create(NewQueueConfig::new(app.id, conn.id, vec![QueueName::new("default", 1)]))
            .unwrap();

        let entries = fleet.audit.by_causer("deploy-bot").unwrap();
        assert_eq!(entries.len(), 4);
        assert!(fleet.audit.all().unwrap().iter().all(|e| e.causer.is_some()));
    }
}
