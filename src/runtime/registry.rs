//! Cancellation ids for timers.
//!
//! Ids are sampled at random from the positive 32-bit range and re-sampled on
//! collision. The candidate that passes the collision test is the one stored.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Largest id handed out, so ids survive a round trip through a JS number.
const MAX_TIMER_ID: u32 = i32::MAX as u32;

/// Opaque cancellation handle shared by `setTimeout`/`setInterval` and the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u32);

impl TimerId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TimerId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared cancellation flag; the task reads it, any thread may set it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Maps live cancellation ids to the flag of the task they denote.
#[derive(Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<TimerId, CancelFlag>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a fresh id to `flag`.
    pub fn register(&self, flag: CancelFlag) -> TimerId {
        let mut entries = self.entries.lock();
        let mut rng = rand::thread_rng();
        loop {
            let candidate = TimerId(rng.gen_range(1..=MAX_TIMER_ID));
            if let Entry::Vacant(slot) = entries.entry(candidate) {
                slot.insert(flag);
                return candidate;
            }
        }
    }

    /// Mark the task behind `id` cancelled. It stays registered until its turn.
    pub fn cancel(&self, id: TimerId) -> Result<()> {
        match self.entries.lock().get(&id) {
            Some(flag) => {
                flag.cancel();
                Ok(())
            }
            None => Err(Error::UnknownTimer(id)),
        }
    }

    /// Reclaim `id`. Returns whether it was still registered.
    pub fn deregister(&self, id: TimerId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = CancellationRegistry::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = registry.register(CancelFlag::new());
            assert!(id.get() >= 1 && id.get() <= MAX_TIMER_ID);
            assert!(seen.insert(id), "duplicate id {}", id);
        }
        assert_eq!(registry.len(), 10_000);
    }

    #[test]
    fn test_cancel_sets_shared_flag() {
        let registry = CancellationRegistry::new();
        let flag = CancelFlag::new();
        let id = registry.register(flag.clone());

        assert!(!flag.is_cancelled());
        registry.cancel(id).unwrap();
        assert!(flag.is_cancelled());
        // Cancellation does not reclaim the id.
        assert!(registry.contains(id));
    }

    #[test]
    fn test_cancel_unknown_id() {
        let registry = CancellationRegistry::new();
        let err = registry.cancel(TimerId::from(42)).unwrap_err();
        assert!(matches!(err, Error::UnknownTimer(id) if id.get() == 42));
    }

    #[test]
    fn test_deregister_exactly_once() {
        let registry = CancellationRegistry::new();
        let id = registry.register(CancelFlag::new());
        assert!(registry.deregister(id));
        assert!(!registry.deregister(id));
        assert!(registry.is_empty());
    }
}
