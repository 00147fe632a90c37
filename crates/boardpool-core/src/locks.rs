//! Per-name mutual exclusion.
//!
//! A [`LocksByName`] is a lazily-populated table of named mutexes. It backs
//! the per-entity serialization of the state machine engine: all event and
//! timeout handling for a given entity name runs under that name's lock,
//! while distinct names proceed independently.
//!
//! Entries are created on first use and never removed. The table is bounded
//! by the number of distinct names ever locked, which in practice is the
//! number of devices and requests owned by this process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// A guard holding one named lock. The lock is released on drop.
pub struct NameGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

/// A collection of named locks, each individually lockable.
#[derive(Default)]
pub struct LocksByName {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocksByName {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`, blocking until it is available.
    ///
    /// The entry for `name` is created on first use.
    pub fn lock(&self, name: &str) -> NameGuard {
        let entry = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(name.to_owned()).or_default())
        };
        NameGuard {
            _guard: entry.lock_arc(),
        }
    }

    /// The number of names ever locked through this table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if no name has been locked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}
