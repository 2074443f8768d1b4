//! Field validation shared by every write path.
//!
//! A [`Validator`] collects all violations of a request before anything is
//! persisted, so callers see every rejected field at once.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use redfleet_state::QueueName;

use crate::error::{FieldError, ValidationError};

pub const PORT_RANGE: (u64, u64) = (1, 65_535);
pub const DATABASE_RANGE: (u64, u64) = (0, 15);
pub const PROCESS_RANGE: (u64, u64) = (1, 1000);
pub const TRIES_RANGE: (u64, u64) = (1, 10);
pub const TIMEOUT_RANGE: (u64, u64) = (30, 3600);
pub const MEMORY_RANGE: (u64, u64) = (64, 4096);

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug pattern compiles"))
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.reject(field, message);
        }
    }

    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.reject(field, "is required");
        }
    }

    pub fn range(&mut self, field: &str, value: u64, (min, max): (u64, u64)) {
        if value < min || value > max {
            self.reject(field, format!("must be between {min} and {max}"));
        }
    }

    pub fn slug(&mut self, field: &str, value: &str) {
        if !slug_pattern().is_match(value) {
            self.reject(
                field,
                "must be lowercase letters, digits, and single hyphens",
            );
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

/// Worker settings of a queue configuration, checked together.
#[derive(Debug, Clone, Copy)]
pub struct WorkerLimits {
    pub min_processes: u32,
    pub max_processes: u32,
    pub tries: u32,
    pub timeout: u32,
    pub memory: u32,
}

pub fn validate_worker_limits(v: &mut Validator, limits: &WorkerLimits) {
    v.range("min_processes", limits.min_processes.into(), PROCESS_RANGE);
    v.range("max_processes", limits.max_processes.into(), PROCESS_RANGE);
    v.check(
        limits.min_processes <= limits.max_processes,
        "min_processes",
        "must not exceed max_processes",
    );
    v.range("tries", limits.tries.into(), TRIES_RANGE);
    v.range("timeout", limits.timeout.into(), TIMEOUT_RANGE);
    v.range("memory", limits.memory.into(), MEMORY_RANGE);
}

pub fn validate_queue_names(v: &mut Validator, queues: &[QueueName]) {
    if queues.is_empty() {
        v.reject("queue_names", "must list at least one queue");
        return;
    }
    let mut seen = HashSet::new();
    for queue in queues {
        if queue.name.trim().is_empty() {
            v.reject("queue_names", "queue names must not be empty");
        } else if !seen.insert(queue.name.as_str()) {
            v.reject("queue_names", format!("duplicate queue {:?}", queue.name));
        }
    }
}
