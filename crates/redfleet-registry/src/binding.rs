//! Fleet binding: which connections an application may use, and which one
//! it should use right now.
//!
//! Precedence among an application's active bindings is: the primary first,
//! then ascending `priority`, then earliest `created_at`, then binding id.
//! Every write to an application's binding set goes through
//! [`StateStore::mutate_bindings`], a single write transaction, so concurrent
//! `set_primary` calls for one application serialize and the set never holds
//! two active primaries.

use std::cmp::Ordering;

use serde_json::json;
use tracing::{debug, info, warn};

use redfleet_state::{
    ApplicationId, Binding, ConnectionId, RedisConnection, StateError, StateStore, SubjectKind,
};

use crate::audit::AuditTrail;
use crate::error::{RegistryError, RegistryResult};

/// Options for [`FleetBinding::attach`]; `None` keeps the current value or
/// the default for a new binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachOptions {
    pub priority: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct FleetBinding {
    store: StateStore,
    audit: AuditTrail,
}

/// Ordering used for resolution and listing.
pub fn precedence(a: &Binding, b: &Binding) -> Ordering {
    b.active
        .cmp(&a.active)
        .then(b.is_primary.cmp(&a.is_primary))
        .then(a.priority.cmp(&b.priority))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

impl FleetBinding {
    pub fn new(store: StateStore, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    /// Create a binding or update its priority and active flag.
    pub fn attach(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
        options: AttachOptions,
    ) -> RegistryResult<Binding> {
        self.ensure_endpoints(application_id, connection_id)?;
        let now = redfleet_core::epoch_secs();

        let (before, set) = self.store.mutate_bindings(application_id, |set| {
            let before = set
                .iter()
                .find(|b| b.redis_connection_id == connection_id)
                .cloned();
            let idx = match set.iter().position(|b| b.redis_connection_id == connection_id) {
                Some(idx) => idx,
                None => {
                    set.push(Binding::new(application_id, connection_id, now));
                    set.len() - 1
                }
            };
            let binding = &mut set[idx];
            if let Some(priority) = options.priority {
                binding.priority = priority;
            }
            if let Some(active) = options.active {
                binding.active = active;
            }
            if before.as_ref() != Some(&*binding) {
                binding.updated_at = now;
            }
            demote_conflicting_primary(set, connection_id, now);
            Ok(before)
        })?;

        let binding = find(&set, connection_id)?;
        match before {
            Some(old) => self.audit.updated(SubjectKind::Binding, binding.id, &old, &binding),
            None => self.audit.created(SubjectKind::Binding, binding.id, &binding),
        }
        debug!(application_id, connection_id, priority = binding.priority, "binding attached");
        Ok(binding)
    }

    pub fn detach(&self, application_id: ApplicationId, connection_id: ConnectionId) -> RegistryResult<()> {
        let (removed, _) = self.store.mutate_bindings(application_id, |set| {
            let idx = set
                .iter()
                .position(|b| b.redis_connection_id == connection_id)
                .ok_or_else(|| missing(application_id, connection_id))?;
            Ok(set.remove(idx))
        })?;
        self.audit.deleted(SubjectKind::Binding, removed.id, &removed, true);
        info!(application_id, connection_id, "binding detached");
        Ok(())
    }

    /// Activate or deactivate a binding. A binding reactivated while
    /// flagged primary loses the flag if another active primary exists.
    pub fn set_active(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
        active: bool,
    ) -> RegistryResult<Binding> {
        self.modify(application_id, connection_id, |binding| binding.active = active)
    }

    pub fn set_priority(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
        priority: u32,
    ) -> RegistryResult<Binding> {
        self.modify(application_id, connection_id, |binding| binding.priority = priority)
    }

    /// Make `connection_id` the application's primary, clearing the flag on
    /// every other binding. Creates the binding if absent.
    pub fn set_primary(&self, application_id: ApplicationId, connection_id: ConnectionId) -> RegistryResult<Binding> {
        self.ensure_endpoints(application_id, connection_id)?;
        let now = redfleet_core::epoch_secs();

        let (demoted, set) = self.store.mutate_bindings(application_id, |set| {
            let mut demoted = Vec::new();
            for binding in set.iter_mut() {
                if binding.redis_connection_id != connection_id && binding.is_primary {
                    binding.is_primary = false;
                    binding.updated_at = now;
                    demoted.push(binding.redis_connection_id);
                }
            }
            match set.iter_mut().find(|b| b.redis_connection_id == connection_id) {
                Some(binding) => {
                    if !binding.is_primary {
                        binding.is_primary = true;
                        binding.updated_at = now;
                    }
                }
                None => {
                    let mut binding = Binding::new(application_id, connection_id, now);
                    binding.is_primary = true;
                    set.push(binding);
                }
            }
            Ok(demoted)
        })?;

        let binding = find(&set, connection_id)?;
        self.audit.custom(
            SubjectKind::Binding,
            binding.id,
            "primary_set",
            format!("connection {connection_id} is now primary for application {application_id}"),
            json!({
                "application_id": application_id,
                "redis_connection_id": connection_id,
                "demoted": demoted,
            }),
        );
        info!(application_id, connection_id, demoted = demoted.len(), "primary connection set");
        Ok(binding)
    }

    /// Bindings of an application in precedence order, inactive last.
    pub fn list_for_application(&self, application_id: ApplicationId) -> RegistryResult<Vec<Binding>> {
        let mut bindings = self.store.list_bindings_for_application(application_id)?;
        bindings.sort_by(precedence);
        Ok(bindings)
    }

    pub fn list_for_connection(&self, connection_id: ConnectionId) -> RegistryResult<Vec<Binding>> {
        let mut bindings = self.store.list_bindings_for_connection(connection_id)?;
        bindings.sort_by_key(|b| b.application_id);
        Ok(bindings)
    }

    /// The binding and connection an application should use.
    ///
    /// Walks active bindings in precedence order and returns the first whose
    /// connection is active and not deleted. Connection health is not
    /// consulted here.
    pub fn resolve_binding(&self, application_id: ApplicationId) -> RegistryResult<(Binding, RedisConnection)> {
        let candidates = self.list_for_application(application_id)?;
        for binding in candidates.into_iter().filter(|b| b.active) {
            match self.store.get_connection(binding.redis_connection_id)? {
                Some(conn) if conn.is_usable() => return Ok((binding, conn)),
                Some(conn) => {
                    debug!(
                        application_id,
                        connection_id = conn.id,
                        active = conn.active,
                        deleted = conn.is_deleted(),
                        "skipping unusable connection"
                    );
                }
                None => {
                    warn!(
                        application_id,
                        connection_id = binding.redis_connection_id,
                        "binding points at a missing connection"
                    );
                }
            }
        }
        Err(RegistryError::NoConnectionAvailable(application_id))
    }

    pub fn resolve_connection(&self, application_id: ApplicationId) -> RegistryResult<RedisConnection> {
        self.resolve_binding(application_id).map(|(_, conn)| conn)
    }

    /// Record that a binding was just used. Advisory: failures are logged
    /// and never reach the caller.
    pub fn touch_usage(&self, binding: &Binding) {
        let now = redfleet_core::epoch_secs();
        match self
            .store
            .touch_binding(binding.application_id, binding.redis_connection_id, now)
        {
            Ok(true) => {}
            Ok(false) => debug!(binding_id = binding.id, "touched binding no longer exists"),
            Err(e) => warn!(binding_id = binding.id, error = %e, "failed to record binding usage"),
        }
    }

    fn modify(
        &self,
        application_id: ApplicationId,
        connection_id: ConnectionId,
        edit: impl FnOnce(&mut Binding),
    ) -> RegistryResult<Binding> {
        let now = redfleet_core::epoch_secs();
        let (old, set) = self.store.mutate_bindings(application_id, |set| {
            let binding = set
                .iter_mut()
                .find(|b| b.redis_connection_id == connection_id)
                .ok_or_else(|| missing(application_id, connection_id))?;
            let old = binding.clone();
            edit(binding);
            if *binding != old {
                binding.updated_at = now;
            }
            demote_conflicting_primary(set, connection_id, now);
            Ok(old)
        })?;
        let binding = find(&set, connection_id)?;
        self.audit.updated(SubjectKind::Binding, binding.id, &old, &binding);
        Ok(binding)
    }

    fn ensure_endpoints(&self, application_id: ApplicationId, connection_id: ConnectionId) -> RegistryResult<()> {
        match self.store.get_application(application_id)? {
            Some(app) if !app.is_deleted() => {}
            _ => return Err(RegistryError::NotFound(format!("application {application_id}"))),
        }
        match self.store.get_connection(connection_id)? {
            Some(conn) if !conn.is_deleted() => Ok(()),
            _ => Err(RegistryError::NotFound(format!("redis connection {connection_id}"))),
        }
    }
}

/// If `connection_id`'s binding is an active primary and another active
/// primary exists, drop the flag from `connection_id`'s binding.
fn demote_conflicting_primary(set: &mut [Binding], connection_id: ConnectionId, now: u64) {
    let other_primary = set
        .iter()
        .any(|b| b.redis_connection_id != connection_id && b.active && b.is_primary);
    if !other_primary {
        return;
    }
    if let Some(binding) = set
        .iter_mut()
        .find(|b| b.redis_connection_id == connection_id && b.active && b.is_primary)
    {
        binding.is_primary = false;
        binding.updated_at = now;
        debug!(
            application_id = binding.application_id,
            connection_id, "demoted reactivated binding to keep a single primary"
        );
    }
}

fn missing(application_id: ApplicationId, connection_id: ConnectionId) -> StateError {
    StateError::NotFound(format!("binding {application_id}:{connection_id}"))
}

fn find(set: &[Binding], connection_id: ConnectionId) -> RegistryResult<Binding> {
    set.iter()
        .find(|b| b.redis_connection_id == connection_id)
        .cloned()
        .ok_or_else(|| RegistryError::NotFound(format!("binding for connection {connection_id}")))
}
