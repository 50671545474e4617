//! [`SyntheticInference`] – a deterministic stand-in detector.
//!
//! No network runs here.  The frame's `proposals` sensor tensor plays the
//! role of the decoder's raw candidates and the head outputs are fabricated
//! from them, while the memory update goes through the real
//! [`MergePolicy`].  Two runs over the same frames and seed produce
//! bit-identical outputs.
//!
//! # `proposals`
//!
//! `[N, hidden_dim + 4]`, one row per candidate:
//! `embedding[hidden_dim], x, y, z, score` with `x, y, z` normalized to the
//! detection range.  A frame without a `proposals` tensor has no candidates.

use streammem_memory::{Detection, MemorySnapshot, MergePolicy, ObjectHypothesis};
use streammem_perception::{EgoPose, PcRange};
use streammem_types::{StreamError, Tensor};
use tracing::debug;

use crate::frame_source::FrameInput;
use crate::inference::{DetectionOutput, HeadShape, InferenceUnit};

/// Sensor tensor holding the frame's candidates.
pub const PROPOSALS: &str = "proposals";

/// Scale of the filler class scores, kept well below any real score.
const FILLER_SCORE_SCALE: f32 = 0.05;

/// Deterministic inference unit driven by per-frame proposals.
#[derive(Debug, Clone)]
pub struct SyntheticInference {
    head: HeadShape,
    policy: MergePolicy,
    seed: u64,
}

impl SyntheticInference {
    pub fn new(head: HeadShape, range: PcRange, seed: u64) -> Result<Self, StreamError> {
        let policy = MergePolicy::new(head.pre_capacity, head.post_capacity, range)
            .map_err(|e| StreamError::Config(e.to_string()))?;
        Ok(Self { head, policy, seed })
    }

    pub fn head(&self) -> &HeadShape {
        &self.head
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    fn detections(&self, input: &FrameInput) -> Result<Vec<Detection>, StreamError> {
        let Some(tensor) = input.sensors.get(PROPOSALS) else {
            return Ok(Vec::new());
        };
        let h = self.head.hidden_dim;
        let width = h + 4;
        let values = tensor.as_f32().ok_or_else(|| {
            StreamError::Shape(format!("frame {}: `{PROPOSALS}` must be f32, got {}", input.index, tensor.dtype()))
        })?;
        if tensor.shape().len() != 2 || tensor.shape()[1] != width {
            return Err(StreamError::Shape(format!(
                "frame {}: `{PROPOSALS}` must be [N, {width}], got {:?}",
                input.index,
                tensor.shape()
            )));
        }
        Ok(values
            .chunks_exact(width)
            .map(|row| Detection {
                embedding: row[..h].to_vec(),
                reference_point: [row[h], row[h + 1], row[h + 2]],
                score: row[h + 3],
            })
            .collect())
    }

    /// Filler score in `[0, FILLER_SCORE_SCALE)` for one head cell.
    fn filler(&self, frame: usize, layer: usize, query: usize, class: usize) -> f32 {
        let key = self.seed
            ^ (frame as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (layer as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
            ^ (query as u64).wrapping_mul(0x1656_67B1_9E37_79F9)
            ^ (class as u64).wrapping_mul(0x27D4_EB2F_1656_67C5);
        let bits = splitmix64(key) >> 40;
        (bits as f32 / (1u64 << 24) as f32) * FILLER_SCORE_SCALE
    }
}

/// One decoder query as the fabricated head sees it.
struct Query {
    embedding: Vec<f32>,
    reference_point: [f32; 3],
    velocity: [f32; 2],
    score: f32,
    ego_pose: EgoPose,
}

impl Query {
    fn padding(hidden_dim: usize) -> Self {
        Self {
            embedding: vec![0.0; hidden_dim],
            reference_point: [0.0; 3],
            velocity: [0.0; 2],
            score: 0.0,
            ego_pose: EgoPose::zeros(),
        }
    }

    fn from_memory(slot: &ObjectHypothesis) -> Self {
        // Propagated queries score by recency; sentinels score zero.
        let score = if slot.is_sentinel() {
            0.0
        } else {
            1.0 / (1.0 + slot.timestamp.max(0.0))
        };
        Self {
            embedding: slot.embedding.clone(),
            reference_point: slot.reference_point,
            velocity: slot.velocity,
            score,
            ego_pose: slot.ego_pose,
        }
    }
}

impl InferenceUnit for SyntheticInference {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn forward(&mut self, input: &FrameInput, memory: &MemorySnapshot) -> Result<DetectionOutput, StreamError> {
        let frame = input.index;
        let head = self.head;
        let detections = self.detections(input)?;

        // ── 1. Fresh queries from proposals ─────────────────────────────────
        let mut queries: Vec<Query> = detections
            .iter()
            .take(head.num_proposals)
            .map(|d| Query {
                embedding: d.embedding.clone(),
                reference_point: d.reference_point,
                velocity: [0.0; 2],
                score: d.score,
                ego_pose: EgoPose::identity(),
            })
            .collect();
        queries.resize_with(head.num_proposals, || Query::padding(head.hidden_dim));

        // ── 2. Memory update ────────────────────────────────────────────────
        let outcome = self
            .policy
            .step(memory, detections, input.anchor())
            .map_err(|e| StreamError::contract(frame, "memory", e.to_string()))?;

        // ── 3. Propagated queries from the compensated memory ───────────────
        let slots = outcome.propagated.slots();
        queries.extend(
            (0..head.num_propagated).map(|i| slots.get(i).map_or_else(|| Query::padding(head.hidden_dim), Query::from_memory)),
        );
        let q = queries.len();

        // ── 4. Head outputs ─────────────────────────────────────────────────
        let mut cls = Vec::with_capacity(head.num_layers * q * head.num_classes);
        let mut bbox = Vec::with_capacity(head.num_layers * q * head.code_size);
        for layer in 0..head.num_layers {
            for (qi, query) in queries.iter().enumerate() {
                for class in 0..head.num_classes {
                    cls.push(if class == 0 {
                        query.score
                    } else {
                        self.filler(frame, layer, qi, class)
                    });
                }
                bbox.extend(box_params(query, head.code_size));
            }
        }
        let outs_dec = queries.iter().flat_map(|q| q.embedding.iter().copied()).collect();

        let mut rec_poses: Vec<f32> = queries.iter().flat_map(|q| q.ego_pose.0).collect();
        for i in head.num_propagated..2 * head.num_propagated {
            let pose = slots.get(i).map_or_else(EgoPose::zeros, |s| s.ego_pose);
            rec_poses.extend(pose.0);
        }

        debug!(
            frame,
            proposals = outcome.inserted,
            queries = q,
            live_memory = outcome.next.live_count(),
            "synthetic forward"
        );

        Ok(DetectionOutput {
            all_cls_scores: Tensor::from_f32(vec![head.num_layers, 1, q, head.num_classes], cls)?,
            all_bbox_preds: Tensor::from_f32(vec![head.num_layers, 1, q, head.code_size], bbox)?,
            outs_dec: Tensor::from_f32(vec![1, q, head.hidden_dim], outs_dec)?,
            rec_ego_pose: Tensor::from_f32(vec![1, head.rec_ego_rows(), 4, 4], rec_poses)?,
            post_memory: outcome.post,
            next_memory: outcome.next,
        })
    }
}

/// `cx, cy, w, l, cz, h, sin, cos, vx, vy`; size and heading stay zero.
fn box_params(query: &Query, code_size: usize) -> Vec<f32> {
    let mut params = vec![0.0; code_size];
    let [x, y, z] = query.reference_point;
    let [vx, vy] = query.velocity;
    for (col, value) in [(0, x), (1, y), (4, z), (8, vx), (9, vy)] {
        if let Some(slot) = params.get_mut(col) {
            *slot = value;
        }
    }
    params
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
