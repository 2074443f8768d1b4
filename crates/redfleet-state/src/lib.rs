//! redfleet-state: embedded state store for the connection fleet.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for applications, Redis connections, bindings, queue
//! configurations, health logs, and the audit trail.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric ids are allocated from a `sequences` table and rendered as
//! zero-padded keys, so composite keys (`{application}:{connection}`,
//! `{connection}:{checked_at}:{id}`) sort correctly and support range scans.
//!
//! Every multi-row mutation (cascading deletes, binding-set rewrites, probe
//! recording) runs inside a single redb write transaction. redb admits one
//! writer at a time, which is what serializes concurrent `set_primary`
//! calls for the same application.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
