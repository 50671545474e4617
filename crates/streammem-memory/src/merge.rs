//! Reference memory update: age → compensate → merge → truncate.
//!
//! One call to [`MergePolicy::step`] turns the memory fed into frame *t* plus
//! frame *t*'s detections into:
//!
//! - the **post** memory (`post_capacity` slots): the best new detections at
//!   the head, the propagated previous memory behind them;
//! - the **next** memory (`pre_capacity` slots): the head of the post memory,
//!   which is what frame *t+1* reads.
//!
//! Eviction is strict FIFO by recency: whatever falls off the tail is the
//! oldest material.  Sentinel slots take part in ordering and eviction like
//! any other slot but are skipped by every geometric computation.

use streammem_perception::{EgoPose, PcRange, Vec3};
use tracing::debug;

use crate::MemoryError;
use crate::hypothesis::{FrameAnchor, MemorySnapshot, ObjectHypothesis};

/// Metres within which a new detection is matched to a live slot when
/// estimating its velocity.
pub const DEFAULT_MATCH_RADIUS: f32 = 2.0;

// ─────────────────────────────────────────────────────────────────────────────
// Detection
// ─────────────────────────────────────────────────────────────────────────────

/// A candidate produced by the current frame's decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub embedding: Vec<f32>,
    /// Normalized to the detection range, current ego frame.
    pub reference_point: [f32; 3],
    pub score: f32,
}

/// Result of one [`MergePolicy::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The input memory after aging and ego-motion compensation.
    pub propagated: MemorySnapshot,
    /// Number of real detections inserted at the head of `post`.
    pub inserted: usize,
    /// `post_capacity` slots.
    pub post: MemorySnapshot,
    /// `pre_capacity` slots; the memory for the next frame.
    pub next: MemorySnapshot,
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitive steps
// ─────────────────────────────────────────────────────────────────────────────

/// Add `dt` seconds to the age of every slot.  Sentinel ages stay infinite.
pub fn age(snapshot: &MemorySnapshot, dt: f32) -> MemorySnapshot {
    let slots = snapshot
        .slots()
        .iter()
        .cloned()
        .map(|mut h| {
            h.timestamp += dt;
            h
        })
        .collect();
    snapshot.with_slots(slots)
}

/// Re-express every live slot in a new ego frame.
///
/// `delta` carries points from the snapshot's ego frame into the new one
/// (see [`EgoPose::relative_motion`]).  Reference points are denormalized
/// through `range`, transformed, and normalized again; velocities are rotated;
/// slot ego poses are left-multiplied by `delta`.
pub fn ego_compensate(snapshot: &MemorySnapshot, delta: &EgoPose, range: &PcRange) -> MemorySnapshot {
    let slots = snapshot
        .slots()
        .iter()
        .cloned()
        .map(|mut h| {
            if h.is_sentinel() {
                return h;
            }
            let metric = range.denormalize(Vec3::from_array(h.reference_point));
            h.reference_point = range.normalize(delta.transform_point(metric)).to_array();
            let v = delta.rotate_vector(Vec3::new(h.velocity[0], h.velocity[1], 0.0));
            h.velocity = [v.x, v.y];
            h.ego_pose = delta.compose(&h.ego_pose);
            h
        })
        .collect();
    snapshot.with_slots(slots)
}

/// Keep the `k` highest-scoring detections; ties keep their input order.
pub fn select_top_k(mut detections: Vec<Detection>, k: usize) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections.truncate(k);
    detections
}

/// Concatenate `new` in front of `prior`, then pad with sentinels or cut the
/// tail so the result has exactly `capacity` slots.
pub fn merge(
    new: Vec<ObjectHypothesis>,
    prior: &MemorySnapshot,
    capacity: usize,
) -> Result<MemorySnapshot, MemoryError> {
    let hidden_dim = prior.hidden_dim();
    let mut slots = new;
    slots.extend(prior.slots().iter().cloned());
    slots.truncate(capacity);
    slots.resize_with(capacity, || ObjectHypothesis::sentinel(hidden_dim));
    MemorySnapshot::from_slots(hidden_dim, slots, prior.anchor())
}

/// Keep the first `capacity` slots, evicting from the tail.
pub fn truncate(post: &MemorySnapshot, capacity: usize) -> Result<MemorySnapshot, MemoryError> {
    if post.capacity() < capacity {
        return Err(MemoryError::CapacityMismatch {
            expected: capacity,
            actual: post.capacity(),
        });
    }
    let slots = post.slots()[..capacity].to_vec();
    MemorySnapshot::from_slots(post.hidden_dim(), slots, post.anchor())
}

/// Index and metric distance of the live slot closest to `point`.
///
/// `point` is normalized; distances are measured in metres after
/// denormalizing through `range`.  Sentinel slots are never returned.
pub fn nearest_live(snapshot: &MemorySnapshot, point: [f32; 3], range: &PcRange) -> Option<(usize, f32)> {
    let query = range.denormalize(Vec3::from_array(point));
    snapshot
        .slots()
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_sentinel())
        .map(|(i, h)| {
            let p = range.denormalize(Vec3::from_array(h.reference_point));
            (i, p.sub(query).norm_squared().sqrt())
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ─────────────────────────────────────────────────────────────────────────────
// MergePolicy
// ─────────────────────────────────────────────────────────────────────────────

/// The full per-frame memory update with fixed capacities.
///
/// # Example
///
/// ```rust
/// use streammem_memory::{Detection, FrameAnchor, MemorySnapshot, MergePolicy};
/// use streammem_perception::{EgoPose, PcRange};
///
/// let policy = MergePolicy::new(2, 3, PcRange::default()).unwrap();
/// let anchor = FrameAnchor { timestamp: 0.0, ego_pose: EgoPose::identity() };
/// let det = Detection { embedding: vec![1.0; 4], reference_point: [0.5; 3], score: 0.9 };
///
/// let out = policy.step(&MemorySnapshot::empty(2, 4), vec![det], anchor).unwrap();
/// assert_eq!(out.post.capacity(), 3);
/// assert_eq!(out.next.capacity(), 2);
/// assert_eq!(out.next.slots()[0].embedding, vec![1.0; 4]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MergePolicy {
    pre_capacity: usize,
    post_capacity: usize,
    range: PcRange,
    match_radius: f32,
}

impl MergePolicy {
    pub fn new(pre_capacity: usize, post_capacity: usize, range: PcRange) -> Result<Self, MemoryError> {
        if pre_capacity == 0 {
            return Err(MemoryError::ZeroCapacity);
        }
        if post_capacity <= pre_capacity {
            return Err(MemoryError::InvertedCapacities {
                pre: pre_capacity,
                post: post_capacity,
            });
        }
        Ok(Self {
            pre_capacity,
            post_capacity,
            range,
            match_radius: DEFAULT_MATCH_RADIUS,
        })
    }

    pub fn with_match_radius(mut self, metres: f32) -> Self {
        self.match_radius = metres;
        self
    }

    pub fn pre_capacity(&self) -> usize {
        self.pre_capacity
    }

    pub fn post_capacity(&self) -> usize {
        self.post_capacity
    }

    pub fn range(&self) -> &PcRange {
        &self.range
    }

    /// Head slots reserved for the current frame's detections.
    pub fn new_slots(&self) -> usize {
        self.post_capacity - self.pre_capacity
    }

    /// Age and ego-compensate `prior` into `anchor`'s frame.
    ///
    /// A snapshot with no anchor (the initial memory) is re-anchored as is.
    pub fn propagate(&self, prior: &MemorySnapshot, anchor: FrameAnchor) -> MemorySnapshot {
        match prior.anchor() {
            None => prior.clone().with_anchor(Some(anchor)),
            Some(prev) => {
                let dt = (anchor.timestamp - prev.timestamp) as f32;
                let delta = EgoPose::relative_motion(&prev.ego_pose, &anchor.ego_pose);
                ego_compensate(&age(prior, dt), &delta, &self.range).with_anchor(Some(anchor))
            }
        }
    }

    /// Run one full memory update for the frame described by `anchor`.
    pub fn step(
        &self,
        prior: &MemorySnapshot,
        detections: Vec<Detection>,
        anchor: FrameAnchor,
    ) -> Result<MergeOutcome, MemoryError> {
        if prior.capacity() != self.pre_capacity {
            return Err(MemoryError::CapacityMismatch {
                expected: self.pre_capacity,
                actual: prior.capacity(),
            });
        }
        let dt = prior
            .anchor()
            .map(|prev| (anchor.timestamp - prev.timestamp) as f32)
            .unwrap_or(0.0);
        let propagated = self.propagate(prior, anchor);

        let fresh: Vec<ObjectHypothesis> = select_top_k(detections, self.new_slots())
            .into_iter()
            .map(|d| {
                let velocity = self.estimate_velocity(&propagated, d.reference_point, dt);
                ObjectHypothesis::fresh(d.embedding, d.reference_point, velocity)
            })
            .collect();
        let inserted = fresh.len();

        let post = merge(fresh, &propagated, self.post_capacity)?;
        let next = truncate(&post, self.pre_capacity)?;
        debug!(
            inserted,
            live_post = post.live_count(),
            live_next = next.live_count(),
            dt,
            "memory merged"
        );
        Ok(MergeOutcome {
            propagated,
            inserted,
            post,
            next,
        })
    }

    /// Displacement from the nearest live slot over `dt`, or zero when nothing
    /// lies within the match radius.
    fn estimate_velocity(&self, memory: &MemorySnapshot, point: [f32; 3], dt: f32) -> [f32; 2] {
        if dt <= 0.0 {
            return [0.0; 2];
        }
        match nearest_live(memory, point, &self.range) {
            Some((i, dist)) if dist <= self.match_radius => {
                let from = self.range.denormalize(Vec3::from_array(memory.slots()[i].reference_point));
                let to = self.range.denormalize(Vec3::from_array(point));
                [(to.x - from.x) / dt, (to.y - from.y) / dt]
            }
            _ => [0.0; 2],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
