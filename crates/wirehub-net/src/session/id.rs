//! Session identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Session identifier. Unique for the lifetime of the process.
pub type SessionId = u64;

/// Process-wide counter backing [`GlobalIdGenerator`].
static GLOBAL_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Source of session identifiers.
pub trait IdGenerator: Send + Sync {
    /// Return the next identifier. Must never repeat.
    fn next_id(&self) -> SessionId;
}

/// Default generator: one monotonically increasing counter shared by the
/// whole process, starting at 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalIdGenerator;

impl IdGenerator for GlobalIdGenerator {
    fn next_id(&self) -> SessionId {
        GLOBAL_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Instance-local counter, used where deterministic ids are needed.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Create a generator whose first id is `first`.
    pub fn starting_at(first: SessionId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> SessionId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
