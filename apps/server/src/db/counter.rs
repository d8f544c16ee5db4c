//! Process-wide visit counter.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// In-memory visitor count shared by every request.
///
/// All reads and writes go through one mutex, so concurrent increments are
/// serialized and never lost.
#[derive(Debug, Default)]
pub struct CounterRepo {
    count: Mutex<u64>,
}

impl CounterRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one visit and return the count this increment produced.
    pub fn increment(&self) -> u64 {
        let mut count = self.lock();
        *count += 1;
        *count
    }

    pub fn current(&self) -> u64 {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // The guarded integer is never left half-written.
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
