//! [`MemoryBank`] – single owner of the live memory between frames.
//!
//! The bank does no merging or eviction of its own.  The inference unit reads
//! a [`snapshot`][MemoryBank::snapshot], produces the next memory, and the
//! frame runner commits it with [`update`][MemoryBank::update], which replaces
//! the whole state at once.  A rejected update leaves the previous state in
//! place, so the last good memory stays inspectable after a failed frame.
//!
//! # Example
//!
//! ```rust
//! use streammem_memory::{MemoryBank, MemorySnapshot, ObjectHypothesis};
//!
//! let mut bank = MemoryBank::new(2, 4).unwrap();
//! assert_eq!(bank.snapshot().live_count(), 0);
//!
//! let next = MemorySnapshot::from_slots(
//!     4,
//!     vec![
//!         ObjectHypothesis::fresh(vec![1.0; 4], [0.5; 3], [0.0; 2]),
//!         ObjectHypothesis::sentinel(4),
//!     ],
//!     None,
//! )
//! .unwrap();
//! bank.update(next).unwrap();
//! assert_eq!(bank.snapshot().live_count(), 1);
//! assert_eq!(bank.commits(), 1);
//! ```

use tracing::debug;

use crate::MemoryError;
use crate::hypothesis::MemorySnapshot;

/// Fixed-capacity store of the memory fed into the next frame.
#[derive(Debug)]
pub struct MemoryBank {
    pre_capacity: usize,
    hidden_dim: usize,
    state: MemorySnapshot,
    commits: usize,
}

impl MemoryBank {
    /// A bank holding `pre_capacity` sentinel slots.
    pub fn new(pre_capacity: usize, hidden_dim: usize) -> Result<Self, MemoryError> {
        if pre_capacity == 0 || hidden_dim == 0 {
            return Err(MemoryError::ZeroCapacity);
        }
        Ok(Self {
            pre_capacity,
            hidden_dim,
            state: MemorySnapshot::empty(pre_capacity, hidden_dim),
            commits: 0,
        })
    }

    pub fn pre_capacity(&self) -> usize {
        self.pre_capacity
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// An owned copy of the current state, always `pre_capacity` slots.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.state.clone()
    }

    /// Borrow the last committed state without copying.
    pub fn last_committed(&self) -> &MemorySnapshot {
        &self.state
    }

    /// Number of successful updates since construction.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Replace the whole state with `next`.
    ///
    /// Returns [`MemoryError::CapacityMismatch`] or
    /// [`MemoryError::WidthMismatch`] without touching the current state when
    /// `next` does not match the bank's shape.
    pub fn update(&mut self, next: MemorySnapshot) -> Result<(), MemoryError> {
        if next.capacity() != self.pre_capacity {
            return Err(MemoryError::CapacityMismatch {
                expected: self.pre_capacity,
                actual: next.capacity(),
            });
        }
        if next.hidden_dim() != self.hidden_dim {
            return Err(MemoryError::WidthMismatch {
                slot: 0,
                expected: self.hidden_dim,
                actual: next.hidden_dim(),
            });
        }
        debug!(
            commit = self.commits + 1,
            live = next.live_count(),
            capacity = self.pre_capacity,
            "memory bank updated"
        );
        self.state = next;
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::ObjectHypothesis;

    #[test]
    fn new_bank_snapshot_is_full_size_and_empty() {
        let bank = MemoryBank::new(512, 256).unwrap();
        let snap = bank.snapshot();
        assert_eq!(snap.capacity(), 512);
        assert_eq!(snap.hidden_dim(), 256);
        assert_eq!(snap.live_count(), 0);
        assert_eq!(bank.commits(), 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(MemoryBank::new(0, 4).unwrap_err(), MemoryError::ZeroCapacity);
        assert_eq!(MemoryBank::new(4, 0).unwrap_err(), MemoryError::ZeroCapacity);
    }

    #[test]
    fn update_replaces_state_wholesale() {
        let mut bank = MemoryBank::new(2, 1).unwrap();
        let next = MemorySnapshot::from_slots(
            1,
            vec![
                ObjectHypothesis::fresh(vec![3.0], [0.0; 3], [0.0; 2]),
                ObjectHypothesis::fresh(vec![4.0], [0.0; 3], [0.0; 2]),
            ],
            None,
        )
        .unwrap();
        bank.update(next.clone()).unwrap();
        assert_eq!(bank.snapshot(), next);
        assert_eq!(bank.commits(), 1);
    }

    #[test]
    fn wrong_capacity_update_keeps_previous_state() {
        let mut bank = MemoryBank::new(2, 1).unwrap();
        let before = bank.snapshot();
        let err = bank.update(MemorySnapshot::empty(3, 1)).unwrap_err();
        assert_eq!(
            err,
            MemoryError::CapacityMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(bank.last_committed(), &before);
        assert_eq!(bank.commits(), 0);
    }

    #[test]
    fn wrong_width_update_is_rejected() {
        let mut bank = MemoryBank::new(2, 4).unwrap();
        let err = bank.update(MemorySnapshot::empty(2, 8)).unwrap_err();
        assert!(matches!(err, MemoryError::WidthMismatch { expected: 4, actual: 8, .. }));
    }
}
