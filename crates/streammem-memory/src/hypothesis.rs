//! Memory slots and snapshots.

use streammem_perception::EgoPose;
use streammem_types::{StreamError, Tensor};

use crate::MemoryError;

/// Age written into slots that were never updated.
///
/// Ages grow by the inter-frame delta each frame; an infinite age stays
/// infinite, so empty slots need no special handling when aging.
pub const SENTINEL_TIMESTAMP: f32 = f32::INFINITY;

// ─────────────────────────────────────────────────────────────────────────────
// ObjectHypothesis
// ─────────────────────────────────────────────────────────────────────────────

/// One memory slot: everything known about one tracked object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHypothesis {
    /// Decoder feature vector, `hidden_dim` wide.
    pub embedding: Vec<f32>,
    /// Position normalized to the detection range, in the snapshot's ego frame.
    pub reference_point: [f32; 3],
    /// Ground-plane velocity (m/s) in the snapshot's ego frame.
    pub velocity: [f32; 2],
    /// Accumulated transform from the ego frame in which this slot was
    /// created to the snapshot's ego frame.
    pub ego_pose: EgoPose,
    /// Age in seconds relative to the snapshot's frame.
    pub timestamp: f32,
}

impl ObjectHypothesis {
    /// A never-updated slot: zeros everywhere and a [`SENTINEL_TIMESTAMP`] age.
    pub fn sentinel(hidden_dim: usize) -> Self {
        Self {
            embedding: vec![0.0; hidden_dim],
            reference_point: [0.0; 3],
            velocity: [0.0; 2],
            ego_pose: EgoPose::zeros(),
            timestamp: SENTINEL_TIMESTAMP,
        }
    }

    /// A slot created in the current frame: age zero, identity ego pose.
    pub fn fresh(embedding: Vec<f32>, reference_point: [f32; 3], velocity: [f32; 2]) -> Self {
        Self {
            embedding,
            reference_point,
            velocity,
            ego_pose: EgoPose::identity(),
            timestamp: 0.0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.timestamp == SENTINEL_TIMESTAMP
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameAnchor
// ─────────────────────────────────────────────────────────────────────────────

/// The frame whose ego coordinates a snapshot is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnchor {
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    /// Ego → global transform at that timestamp.
    pub ego_pose: EgoPose,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemorySnapshot
// ─────────────────────────────────────────────────────────────────────────────

/// The full set of memory slots at one instant.
///
/// The slot count is the snapshot's capacity; it never changes after
/// construction.  Slots are kept as whole [`ObjectHypothesis`] records and are
/// only split into per-attribute tensors at the dump boundary
/// ([`MemorySnapshot::field_tensors`]).
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    hidden_dim: usize,
    slots: Vec<ObjectHypothesis>,
    anchor: Option<FrameAnchor>,
}

impl MemorySnapshot {
    /// `capacity` sentinel slots with no frame anchor.
    pub fn empty(capacity: usize, hidden_dim: usize) -> Self {
        Self {
            hidden_dim,
            slots: vec![ObjectHypothesis::sentinel(hidden_dim); capacity],
            anchor: None,
        }
    }

    /// Build from explicit slots, checking every embedding width.
    pub fn from_slots(
        hidden_dim: usize,
        slots: Vec<ObjectHypothesis>,
        anchor: Option<FrameAnchor>,
    ) -> Result<Self, MemoryError> {
        if let Some((slot, h)) = slots
            .iter()
            .enumerate()
            .find(|(_, h)| h.embedding.len() != hidden_dim)
        {
            return Err(MemoryError::WidthMismatch {
                slot,
                expected: hidden_dim,
                actual: h.embedding.len(),
            });
        }
        Ok(Self {
            hidden_dim,
            slots,
            anchor,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn slots(&self) -> &[ObjectHypothesis] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<ObjectHypothesis> {
        self.slots
    }

    pub fn anchor(&self) -> Option<FrameAnchor> {
        self.anchor
    }

    /// Same slots, re-anchored to another frame.
    pub fn with_anchor(mut self, anchor: Option<FrameAnchor>) -> Self {
        self.anchor = anchor;
        self
    }

    /// Same width and anchor, new slots.  Only used for per-slot scalar
    /// edits, which cannot change embedding widths.
    pub(crate) fn with_slots(&self, slots: Vec<ObjectHypothesis>) -> Self {
        Self {
            hidden_dim: self.hidden_dim,
            slots,
            anchor: self.anchor,
        }
    }

    /// Number of slots holding a real hypothesis.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|h| !h.is_sentinel()).count()
    }

    // ── Tensor views ────────────────────────────────────────────────────────

    /// `[1, capacity, hidden_dim]`
    pub fn embedding_tensor(&self) -> Result<Tensor, StreamError> {
        let data = self.slots.iter().flat_map(|h| h.embedding.iter().copied()).collect();
        Tensor::from_f32(vec![1, self.capacity(), self.hidden_dim], data)
    }

    /// `[1, capacity, 1]`
    pub fn timestamp_tensor(&self) -> Result<Tensor, StreamError> {
        let data = self.slots.iter().map(|h| h.timestamp).collect();
        Tensor::from_f32(vec![1, self.capacity(), 1], data)
    }

    /// `[1, capacity, 4, 4]`
    pub fn ego_pose_tensor(&self) -> Result<Tensor, StreamError> {
        let data = self.slots.iter().flat_map(|h| h.ego_pose.0).collect();
        Tensor::from_f32(vec![1, self.capacity(), 4, 4], data)
    }

    /// `[1, capacity, 3]`
    pub fn reference_point_tensor(&self) -> Result<Tensor, StreamError> {
        let data = self.slots.iter().flat_map(|h| h.reference_point).collect();
        Tensor::from_f32(vec![1, self.capacity(), 3], data)
    }

    /// `[1, capacity, 2]`
    pub fn velocity_tensor(&self) -> Result<Tensor, StreamError> {
        let data = self.slots.iter().flat_map(|h| h.velocity).collect();
        Tensor::from_f32(vec![1, self.capacity(), 2], data)
    }

    /// All five attribute tensors, keyed by dump suffix, in dump order.
    pub fn field_tensors(&self) -> Result<Vec<(&'static str, Tensor)>, StreamError> {
        Ok(vec![
            ("embedding", self.embedding_tensor()?),
            ("timestamp", self.timestamp_tensor()?),
            ("egopose", self.ego_pose_tensor()?),
            ("ref_point", self.reference_point_tensor()?),
            ("velo", self.velocity_tensor()?),
        ])
    }

    /// Rebuild a snapshot from the five attribute buffers (batch size 1).
    ///
    /// Every buffer must describe the same number of rows; the embedding
    /// width is inferred from `embedding.len() / rows`.
    pub fn from_field_buffers(
        rows: usize,
        embedding: &[f32],
        timestamp: &[f32],
        ego_pose: &[f32],
        reference_point: &[f32],
        velocity: &[f32],
    ) -> Result<Self, MemoryError> {
        if rows == 0 {
            return Err(MemoryError::ZeroCapacity);
        }
        let check = |field: &'static str, buf: &[f32], width: usize| {
            if buf.len() != rows * width {
                Err(MemoryError::RowMismatch {
                    field,
                    expected: rows,
                    actual: buf.len() / width.max(1),
                })
            } else {
                Ok(())
            }
        };
        if embedding.len() % rows != 0 {
            return Err(MemoryError::RowMismatch {
                field: "embedding",
                expected: rows,
                actual: embedding.len(),
            });
        }
        let hidden_dim = embedding.len() / rows;
        check("timestamp", timestamp, 1)?;
        check("egopose", ego_pose, 16)?;
        check("ref_point", reference_point, 3)?;
        check("velo", velocity, 2)?;

        let slots = (0..rows)
            .map(|i| {
                let mut pose = [0.0; 16];
                pose.copy_from_slice(&ego_pose[i * 16..i * 16 + 16]);
                ObjectHypothesis {
                    embedding: embedding[i * hidden_dim..(i + 1) * hidden_dim].to_vec(),
                    reference_point: [
                        reference_point[i * 3],
                        reference_point[i * 3 + 1],
                        reference_point[i * 3 + 2],
                    ],
                    velocity: [velocity[i * 2], velocity[i * 2 + 1]],
                    ego_pose: EgoPose(pose),
                    timestamp: timestamp[i],
                }
            })
            .collect();
        Ok(Self {
            hidden_dim,
            slots,
            anchor: None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
