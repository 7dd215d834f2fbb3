// Identifier generation for visibility records
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Mints identifiers for newly created records.
pub trait IdGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::CoreError::IdGeneration`] when no identifier could be produced.
    fn generate(&self) -> Result<String>;
}

/// Random UUIDv4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Result<String> {
        Ok(generate_id())
    }
}

/// Deterministic `{prefix}-{n}` identifiers, starting at 1.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> Result<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{n}", self.prefix))
    }
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
