//! Revision tracking for values the GPU observes.
//!
//! Every mutable GPU-visible value carries a [`VersionedObject`]. Consumers
//! copy its [`Version`] when they upload the value and later compare the copy
//! against the live one to decide whether a re-upload is needed.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GLOBAL_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of an object's identity and revision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub global_id: u64,
    pub revision: u64,
}

impl Version {
    /// The "never observed" version. No live object has global id 0.
    pub const NONE: Version = Version {
        global_id: 0,
        revision: 0,
    };

    pub fn new(global_id: u64, revision: u64) -> Self {
        Self {
            global_id,
            revision,
        }
    }
}

/// Owner of one [`Version`]; `increment` is the only way it changes.
#[derive(Debug)]
pub struct VersionedObject {
    global_id: u64,
    revision: Cell<u64>,
}

impl VersionedObject {
    pub fn new() -> Self {
        Self {
            global_id: NEXT_GLOBAL_ID.fetch_add(1, Ordering::Relaxed),
            revision: Cell::new(0),
        }
    }

    /// Bumps the revision by exactly one.
    pub fn increment(&self) {
        self.revision.set(self.revision.get() + 1);
    }

    pub fn version(&self) -> Version {
        Version::new(self.global_id, self.revision.get())
    }

    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    pub fn revision(&self) -> u64 {
        self.revision.get()
    }
}

impl Default for VersionedObject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_objects_get_distinct_ids_and_zero_revision() {
        let a = VersionedObject::new();
        let b = VersionedObject::new();
        assert_ne!(a.global_id(), b.global_id());
        assert!(a.global_id() >= 1);
        assert_eq!(a.revision(), 0);
        assert_eq!(b.revision(), 0);
    }

    #[test]
    fn increment_is_monotonic_by_one() {
        let object = VersionedObject::new();
        let mut last = object.version();
        for expected in 1..=5 {
            object.increment();
            let current = object.version();
            assert_eq!(current.global_id, last.global_id);
            assert_eq!(current.revision, expected);
            assert_ne!(current, last);
            last = current;
        }
    }

    #[test]
    fn none_never_matches_a_live_object() {
        let object = VersionedObject::new();
        assert_ne!(object.version(), Version::NONE);
    }
}
