//! The inference-unit contract.
//!
//! The detector itself is opaque.  All the frame runner needs is a call that
//! takes one frame's sensor input and the current memory snapshot and returns
//! a fully populated [`DetectionOutput`], including the merged memory and the
//! memory to carry into the next frame.

use std::collections::BTreeMap;

use streammem_memory::MemorySnapshot;
use streammem_types::{StreamError, Tensor};

use crate::frame_source::FrameInput;

// ─────────────────────────────────────────────────────────────────────────────
// HeadShape
// ─────────────────────────────────────────────────────────────────────────────

/// Declared output dimensions of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadShape {
    /// Decoder layers (leading dim of scores and boxes).
    pub num_layers: usize,
    /// Fresh queries per frame.
    pub num_proposals: usize,
    /// Memory slots re-injected as queries each frame.
    pub num_propagated: usize,
    pub num_classes: usize,
    /// Box parameters per query.
    pub code_size: usize,
    pub hidden_dim: usize,
    pub pre_capacity: usize,
    pub post_capacity: usize,
}

impl Default for HeadShape {
    fn default() -> Self {
        Self {
            num_layers: 6,
            num_proposals: 300,
            num_propagated: 128,
            num_classes: 10,
            code_size: 10,
            hidden_dim: 256,
            pre_capacity: 512,
            post_capacity: 640,
        }
    }
}

impl HeadShape {
    /// Decoder queries per frame: fresh plus propagated.
    pub fn num_queries(&self) -> usize {
        self.num_proposals + self.num_propagated
    }

    /// Rows of `rec_ego_pose`: one per query plus one per temporal key.
    pub fn rec_ego_rows(&self) -> usize {
        self.num_queries() + self.num_propagated
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DetectionOutput
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one forward call produces.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
    /// `[layers, 1, Q, classes]`
    pub all_cls_scores: Tensor,
    /// `[layers, 1, Q, code_size]`
    pub all_bbox_preds: Tensor,
    /// `[1, Q, hidden]`
    pub outs_dec: Tensor,
    /// `[1, Q + propagated, 4, 4]`
    pub rec_ego_pose: Tensor,
    /// Merged memory, `post_capacity` slots.
    pub post_memory: MemorySnapshot,
    /// Truncated memory for the next frame, `pre_capacity` slots.
    pub next_memory: MemorySnapshot,
}

/// Output keys a tensor-map backend must provide.
pub const REQUIRED_KEYS: [&str; 14] = [
    "all_cls_scores",
    "all_bbox_preds",
    "outs_dec",
    "rec_ego_pose",
    "mem_embedding",
    "mem_timestamp",
    "mem_egopose",
    "mem_ref_point",
    "mem_velo",
    "post_mem_embedding",
    "post_mem_timestamp",
    "post_mem_egopose",
    "post_mem_ref_point",
    "post_mem_velo",
];

impl DetectionOutput {
    /// Assemble an output from a name → tensor map, as produced by backends
    /// that return a dictionary of tensors.
    ///
    /// A missing key is a contract violation; nothing is defaulted.
    pub fn from_tensor_map(frame: usize, mut map: BTreeMap<String, Tensor>) -> Result<Self, StreamError> {
        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !map.contains_key(**k)) {
            return Err(StreamError::contract(frame, *missing, "field missing from forward output"));
        }
        let mut take = |key: &str| {
            map.remove(key)
                .ok_or_else(|| StreamError::contract(frame, key, "field missing from forward output"))
        };
        let all_cls_scores = take("all_cls_scores")?;
        let all_bbox_preds = take("all_bbox_preds")?;
        let outs_dec = take("outs_dec")?;
        let rec_ego_pose = take("rec_ego_pose")?;
        let next_memory = snapshot_from_map(frame, "mem", &mut take)?;
        let post_memory = snapshot_from_map(frame, "post_mem", &mut take)?;
        Ok(Self {
            all_cls_scores,
            all_bbox_preds,
            outs_dec,
            rec_ego_pose,
            post_memory,
            next_memory,
        })
    }

    /// Check every shape against `head`.
    pub fn validate(&self, frame: usize, head: &HeadShape) -> Result<(), StreamError> {
        let q = head.num_queries();
        expect_shape(frame, "all_cls_scores", &self.all_cls_scores, &[head.num_layers, 1, q, head.num_classes])?;
        expect_shape(frame, "all_bbox_preds", &self.all_bbox_preds, &[head.num_layers, 1, q, head.code_size])?;
        expect_shape(frame, "outs_dec", &self.outs_dec, &[1, q, head.hidden_dim])?;
        expect_shape(frame, "rec_ego_pose", &self.rec_ego_pose, &[1, head.rec_ego_rows(), 4, 4])?;
        expect_memory(frame, "post_mem", &self.post_memory, head.post_capacity, head.hidden_dim)?;
        expect_memory(frame, "mem", &self.next_memory, head.pre_capacity, head.hidden_dim)?;
        Ok(())
    }
}

fn expect_shape(frame: usize, field: &str, tensor: &Tensor, expected: &[usize]) -> Result<(), StreamError> {
    if tensor.shape() != expected {
        return Err(StreamError::contract(
            frame,
            field,
            format!("expected shape {expected:?}, got {:?}", tensor.shape()),
        ));
    }
    Ok(())
}

fn expect_memory(
    frame: usize,
    prefix: &str,
    memory: &MemorySnapshot,
    capacity: usize,
    hidden_dim: usize,
) -> Result<(), StreamError> {
    if memory.capacity() != capacity {
        return Err(StreamError::contract(
            frame,
            format!("{prefix}_embedding"),
            format!("expected {capacity} slots, got {}", memory.capacity()),
        ));
    }
    if memory.hidden_dim() != hidden_dim {
        return Err(StreamError::contract(
            frame,
            format!("{prefix}_embedding"),
            format!("expected width {hidden_dim}, got {}", memory.hidden_dim()),
        ));
    }
    Ok(())
}

fn snapshot_from_map(
    frame: usize,
    prefix: &str,
    take: &mut impl FnMut(&str) -> Result<Tensor, StreamError>,
) -> Result<MemorySnapshot, StreamError> {
    let mut fields = Vec::with_capacity(5);
    for suffix in ["embedding", "timestamp", "egopose", "ref_point", "velo"] {
        let key = format!("{prefix}_{suffix}");
        let tensor = take(&key)?;
        let Some(values) = tensor.as_f32() else {
            return Err(StreamError::contract(frame, key, format!("expected f32, got {}", tensor.dtype())));
        };
        let rows = tensor.shape().get(1).copied().unwrap_or(0);
        fields.push((key, rows, values.to_vec()));
    }
    let rows = fields[0].1;
    if let Some((key, r, _)) = fields.iter().find(|(_, r, _)| *r != rows) {
        return Err(StreamError::contract(
            frame,
            key.clone(),
            format!("{r} rows disagree with {rows} embedding rows"),
        ));
    }
    MemorySnapshot::from_field_buffers(rows, &fields[0].2, &fields[1].2, &fields[2].2, &fields[3].2, &fields[4].2)
        .map_err(|e| StreamError::contract(frame, format!("{prefix}_embedding"), e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// InferenceUnit
// ─────────────────────────────────────────────────────────────────────────────

/// One forward pass of the streaming detector.
///
/// Implementations own the merge/evict policy: `next_memory` in the returned
/// output must already be truncated to `pre_capacity`.  The call is treated
/// as blocking; the runner does not start the next frame until it returns.
pub trait InferenceUnit {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn forward(&mut self, input: &FrameInput, memory: &MemorySnapshot) -> Result<DetectionOutput, StreamError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
