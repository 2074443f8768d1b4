//! Append-only audit trail of registry mutations.
//!
//! Each registry records what it changed through an [`AuditTrail`]. The
//! acting operator is request-scoped: build a trail with
//! [`AuditTrail::acting_as`] for each request rather than keeping ambient
//! session state. Secrets never reach the trail; the `secret` attribute and
//! any `options.password` are stripped from every recorded snapshot and diff.

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use redfleet_state::{AuditEntry, AuditEvent, AuditSubject, StateStore, SubjectKind};

use crate::error::RegistryResult;
use crate::target::PASSWORD_OPTION;

/// Attributes never written to the trail.
const HIDDEN_ATTRIBUTES: &[&str] = &["secret"];
/// Attributes that change on every write and carry no information in a diff.
const IGNORED_IN_DIFF: &[&str] = &["updated_at"];

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Clone)]
pub struct AuditTrail {
    store: StateStore,
    causer: Option<String>,
}

impl AuditTrail {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            causer: None,
        }
    }

    /// A trail that attributes entries to `causer`.
    pub fn acting_as(&self, causer: impl Into<String>) -> Self {
        Self {
            store: self.store.clone(),
            causer: Some(causer.into()),
        }
    }

    pub fn causer(&self) -> Option<&str> {
        self.causer.as_deref()
    }

    pub fn created<T: Serialize>(&self, kind: SubjectKind, id: u64, value: &T) {
        let attributes = snapshot(value);
        self.record(
            kind,
            id,
            AuditEvent::Created,
            format!("{} {id} created", kind_label(kind)),
            json!({ "attributes": attributes }),
        );
    }

    /// Record only the attributes that changed. Nothing is written when
    /// `old` and `new` agree on every visible attribute.
    pub fn updated<T: Serialize>(&self, kind: SubjectKind, id: u64, old: &T, new: &T) {
        let (before, after) = diff(&snapshot(old), &snapshot(new));
        if after.is_empty() {
            return;
        }
        self.record(
            kind,
            id,
            AuditEvent::Updated,
            format!("{} {id} updated", kind_label(kind)),
            json!({ "old": before, "attributes": after }),
        );
    }

    pub fn deleted<T: Serialize>(&self, kind: SubjectKind, id: u64, value: &T, purged: bool) {
        self.record(
            kind,
            id,
            AuditEvent::Deleted,
            format!("{} {id} deleted", kind_label(kind)),
            json!({ "old": snapshot(value), "purged": purged }),
        );
    }

    pub fn restored(&self, kind: SubjectKind, id: u64) {
        self.record(
            kind,
            id,
            AuditEvent::Restored,
            format!("{} {id} restored", kind_label(kind)),
            json!({}),
        );
    }

    /// Record a domain event that is not a plain create/update/delete.
    pub fn custom(&self, kind: SubjectKind, id: u64, event: &str, description: String, properties: Value) {
        self.record(kind, id, AuditEvent::Custom(event.to_string()), description, properties);
    }

    /// Audit failures never undo the mutation they describe.
    fn record(&self, kind: SubjectKind, id: u64, event: AuditEvent, description: String, properties: Value) {
        let entry = AuditEntry {
            id: 0,
            log_name: Some(log_name(kind).to_string()),
            description,
            subject: Some(AuditSubject { kind, id }),
            causer: self.causer.clone(),
            event,
            properties,
            created_at: redfleet_core::epoch_secs(),
        };
        if let Err(e) = self.store.append_audit(entry) {
            warn!(?kind, id, error = %e, "failed to append audit entry");
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn all(&self) -> RegistryResult<Vec<AuditEntry>> {
        Ok(self.store.list_audit()?)
    }

    pub fn for_subject(&self, kind: SubjectKind, id: u64) -> RegistryResult<Vec<AuditEntry>> {
        self.filtered(|e| e.subject == Some(AuditSubject { kind, id }))
    }

    pub fn by_causer(&self, causer: &str) -> RegistryResult<Vec<AuditEntry>> {
        self.filtered(|e| e.causer.as_deref() == Some(causer))
    }

    pub fn for_event(&self, event: &AuditEvent) -> RegistryResult<Vec<AuditEntry>> {
        self.filtered(|e| &e.event == event)
    }

    pub fn in_log(&self, log_name: &str) -> RegistryResult<Vec<AuditEntry>> {
        self.filtered(|e| e.log_name.as_deref() == Some(log_name))
    }

    /// Entries from the last `days` days, newest first.
    pub fn recent(&self, days: u64) -> RegistryResult<Vec<AuditEntry>> {
        let cutoff = redfleet_core::epoch_secs().saturating_sub(days.saturating_mul(SECONDS_PER_DAY));
        let mut entries = self.filtered(|e| e.created_at >= cutoff)?;
        entries.reverse();
        Ok(entries)
    }

    fn filtered(&self, keep: impl Fn(&AuditEntry) -> bool) -> RegistryResult<Vec<AuditEntry>> {
        Ok(self.store.list_audit()?.into_iter().filter(|e| keep(e)).collect())
    }
}

pub fn log_name(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::Application => "applications",
        SubjectKind::RedisConnection => "redis_connections",
        SubjectKind::Binding => "bindings",
        SubjectKind::QueueConfiguration => "queue_configurations",
    }
}

fn kind_label(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::Application => "application",
        SubjectKind::RedisConnection => "redis connection",
        SubjectKind::Binding => "binding",
        SubjectKind::QueueConfiguration => "queue configuration",
    }
}

/// Serialize `value` as a JSON object with hidden attributes removed.
fn snapshot<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut map)) => {
            for hidden in HIDDEN_ATTRIBUTES {
                map.remove(*hidden);
            }
            if let Some(Value::Object(options)) = map.get_mut("options") {
                options.remove(PASSWORD_OPTION);
            }
            map
        }
        Ok(_) | Err(_) => Map::new(),
    }
}

fn diff(old: &Map<String, Value>, new: &Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut before = Map::new();
    let mut after = Map::new();
    for (field, value) in new {
        if IGNORED_IN_DIFF.contains(&field.as_str()) {
            continue;
        }
        let previous = old.get(field).cloned().unwrap_or(Value::Null);
        if &previous != value {
            before.insert(field.clone(), previous);
            after.insert(field.clone(), value.clone());
        }
    }
    (before, after)
}
