//! `streammem-memory` – the temporal object memory.
//!
//! Carries object-hypothesis state (embedding, reference point, velocity, ego
//! pose, age) from frame *t* to frame *t+1* under a fixed capacity.
//!
//! # Modules
//!
//! - [`hypothesis`] – [`ObjectHypothesis`][hypothesis::ObjectHypothesis] and
//!   [`MemorySnapshot`][hypothesis::MemorySnapshot]: one memory slot and the
//!   fixed-size set of slots at one instant.  Slots are stored as whole
//!   records so the five attributes of a slot can never drift apart.
//! - [`bank`] – [`MemoryBank`][bank::MemoryBank]: the single owner of live
//!   memory between frames.  A dumb store: read a snapshot, replace it
//!   wholesale.
//! - [`merge`] – [`MergePolicy`][merge::MergePolicy]: the reference
//!   age → compensate → merge → truncate step that turns the previous memory
//!   plus the current frame's detections into the next memory.
//!
//! # Ordering
//!
//! Slots are ordered most-recently-created first.  New detections enter at
//! the head; eviction always drops from the tail.

pub mod bank;
pub mod hypothesis;
pub mod merge;

pub use bank::MemoryBank;
pub use hypothesis::{FrameAnchor, MemorySnapshot, ObjectHypothesis, SENTINEL_TIMESTAMP};
pub use merge::{Detection, MergeOutcome, MergePolicy};

use thiserror::Error;

/// Errors raised by memory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("Capacity must be greater than zero")]
    ZeroCapacity,
    #[error("Expected {expected} memory slots, got {actual}")]
    CapacityMismatch { expected: usize, actual: usize },
    #[error("Slot {slot} has embedding width {actual}, expected {expected}")]
    WidthMismatch {
        slot: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Field `{field}` has {actual} rows, expected {expected}")]
    RowMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Post capacity {post} must exceed pre capacity {pre}")]
    InvertedCapacities { pre: usize, post: usize },
}
