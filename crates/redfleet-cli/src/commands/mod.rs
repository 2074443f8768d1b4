pub mod app;
pub mod bind;
pub mod conn;
pub mod health;
pub mod queue;
pub mod setup;

use std::sync::Arc;

use anyhow::Context as _;
use redfleet_core::FleetConfig;
use redfleet_health::{HealthProber, RespPinger};
use redfleet_registry::Fleet;
use redfleet_state::{Application, RedisConnection, StateStore};
use redfleet_vault::CredentialVault;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const REDACTED: &str = "********";

/// Everything a fleet command needs: the config and an opened fleet.
pub struct Context {
    pub config: FleetConfig,
    pub fleet: Fleet,
}

impl Context {
    pub fn open(config: FleetConfig, actor: Option<&str>) -> anyhow::Result<Self> {
        let path = config.store_path();
        let store = StateStore::open(&path)
            .with_context(|| format!("opening state store {}", path.display()))?;
        let vault = CredentialVault::from_base64(&config.vault_key()?)?;
        debug!(store = %path.display(), fingerprint = vault.fingerprint(), "fleet opened");

        let fleet = Fleet::new(store, Arc::new(vault));
        let fleet = match actor {
            Some(actor) => fleet.acting_as(actor),
            None => fleet,
        };
        Ok(Self { config, fleet })
    }

    pub fn application(&self, slug: &str) -> anyhow::Result<Application> {
        Ok(self.fleet.applications.get_by_slug(slug)?)
    }

    pub fn connection(&self, name: &str) -> anyhow::Result<RedisConnection> {
        self.fleet
            .connections
            .find_by_name(name)?
            .ok_or_else(|| anyhow::anyhow!("no connection named {name:?}"))
    }

    pub fn prober(&self) -> anyhow::Result<HealthProber> {
        Ok(
            HealthProber::new(self.fleet.connections.clone(), Arc::new(RespPinger::default()))
                .with_timeout(self.config.probe_timeout()?)
                .with_concurrency(self.config.probe_concurrency()),
        )
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// JSON view of a connection without its sealed secret or any password
/// option.
pub fn redact_connection(conn: &RedisConnection) -> anyhow::Result<Value> {
    let mut value = serde_json::to_value(conn)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("secret");
        obj.insert("has_password".to_string(), Value::Bool(conn.secret.is_some()));
        if let Some(Value::Object(options)) = obj.get_mut("options") {
            if let Some(password) = options.get_mut("password") {
                *password = Value::String(REDACTED.to_string());
            }
        }
    }
    Ok(value)
}
