//! Store failures.
//!
//! redb reports a distinct error type per stage (open, transaction, table,
//! storage, commit). They are flattened into strings here so callers above
//! the store never depend on redb directly.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state store: {0}")]
    Open(String),

    /// Begin or commit failed.
    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    /// A row could not be encoded, or a stored row no longer decodes.
    #[error("row codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness rule (slug, connection name, binding pair, queue
    /// configuration pair) would be violated.
    #[error("conflict: {0}")]
    Conflict(String),
}
