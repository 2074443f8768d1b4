//! redb table definitions for the redfleet state store.
//!
//! Entity tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Ids are rendered with [`id_key`] so lexical order matches numeric
//! order.

use redb::TableDefinition;

/// Applications keyed by `{id}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Redis connections keyed by `{id}`.
pub const CONNECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("redis_connections");

/// Bindings keyed by `{application_id}:{connection_id}`.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");

/// Queue configurations keyed by `{id}`.
pub const QUEUE_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("queue_configurations");

/// Health logs keyed by `{connection_id}:{checked_at}:{id}`.
pub const HEALTH_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("health_logs");

/// Audit entries keyed by `{id}`.
pub const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

/// Last allocated id per sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Render a numeric id as a fixed-width, lexically ordered key segment.
pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

/// Shape shared by every JSON entity table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Exclusive upper bound for a `{segment}:` prefix scan (`;` sorts after `:`).
pub fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.trim_end_matches(':').to_string();
    end.push(';');
    end
}
