//! The per-frame artifact set.
//!
//! Maps a [`DetectionOutput`] (plus the memory fed into the frame) onto the
//! artifact names the reference dump script uses, in the order it writes
//! them.  Only this module knows those names; the writer treats them as
//! opaque strings.

use streammem_memory::MemorySnapshot;
use streammem_types::{StreamError, Tensor};

use crate::inference::DetectionOutput;

/// Artifacts the reference dump script writes, in write order.  Every frame
/// writes these followed by the `in_mem_*` dump of its fed memory.
pub const REQUIRED_ARTIFACTS: [&str; 14] = [
    "all_cls_scores",
    "all_bbox_preds",
    "out_mem_embedding",
    "out_mem_timestamp",
    "out_mem_egopose",
    "out_mem_ref_point",
    "out_mem_velo",
    "out_rec_ego_pose",
    "out_outs_dec",
    "post_mem_embedding",
    "post_mem_timestamp",
    "post_mem_egopose",
    "post_mem_ref_point",
    "post_mem_velo",
];

/// Prefix of the dump of the memory fed into the frame.
pub const INPUT_MEMORY_PREFIX: &str = "in_mem";

/// Forward-output key for a dumped artifact name, e.g. `out_mem_velo` →
/// `mem_velo`.  Names that are already keys map to themselves.
pub fn output_key(artifact: &str) -> &str {
    artifact.strip_prefix("out_").unwrap_or(artifact)
}

/// Build the full named-tensor list for one frame.
///
/// `fed_memory` is the snapshot the inference unit received, emitted last as
/// `in_mem_*`.
pub fn frame_artifacts(
    output: &DetectionOutput,
    fed_memory: &MemorySnapshot,
) -> Result<Vec<(String, Tensor)>, StreamError> {
    let mut named = Vec::with_capacity(REQUIRED_ARTIFACTS.len() + 5);
    named.push(("all_cls_scores".to_string(), output.all_cls_scores.clone()));
    named.push(("all_bbox_preds".to_string(), output.all_bbox_preds.clone()));
    push_memory(&mut named, "out_mem", &output.next_memory)?;
    named.push(("out_rec_ego_pose".to_string(), output.rec_ego_pose.clone()));
    named.push(("out_outs_dec".to_string(), output.outs_dec.clone()));
    push_memory(&mut named, "post_mem", &output.post_memory)?;
    push_memory(&mut named, INPUT_MEMORY_PREFIX, fed_memory)?;
    Ok(named)
}

fn push_memory(named: &mut Vec<(String, Tensor)>, prefix: &str, memory: &MemorySnapshot) -> Result<(), StreamError> {
    for (suffix, tensor) in memory.field_tensors()? {
        named.push((format!("{prefix}_{suffix}"), tensor));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::REQUIRED_KEYS;

    fn output(pre: usize, post: usize, hidden: usize) -> DetectionOutput {
        DetectionOutput {
            all_cls_scores: Tensor::zeros(vec![1, 1, 2, 3]),
            all_bbox_preds: Tensor::zeros(vec![1, 1, 2, 10]),
            outs_dec: Tensor::zeros(vec![1, 2, hidden]),
            rec_ego_pose: Tensor::zeros(vec![1, 3, 4, 4]),
            post_memory: MemorySnapshot::empty(post, hidden),
            next_memory: MemorySnapshot::empty(pre, hidden),
        }
    }

    #[test]
    fn required_set_in_reference_order_then_fed_memory() {
        let named = frame_artifacts(&output(2, 3, 4), &MemorySnapshot::empty(2, 4)).unwrap();
        let names: Vec<&str> = named.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names[..REQUIRED_ARTIFACTS.len()], REQUIRED_ARTIFACTS);
        assert_eq!(
            names[REQUIRED_ARTIFACTS.len()..],
            ["in_mem_embedding", "in_mem_timestamp", "in_mem_egopose", "in_mem_ref_point", "in_mem_velo"]
        );
    }

    #[test]
    fn memory_artifacts_carry_their_capacity() {
        let named = frame_artifacts(&output(2, 3, 4), &MemorySnapshot::empty(2, 4)).unwrap();
        let shape = |name: &str| named.iter().find(|(n, _)| n == name).unwrap().1.shape().to_vec();
        assert_eq!(shape("out_mem_embedding"), vec![1, 2, 4]);
        assert_eq!(shape("post_mem_egopose"), vec![1, 3, 4, 4]);
        assert_eq!(shape("in_mem_timestamp"), vec![1, 2, 1]);
        assert_eq!(named.len(), REQUIRED_ARTIFACTS.len() + 5);
    }

    #[test]
    fn every_artifact_maps_to_an_output_key() {
        for artifact in REQUIRED_ARTIFACTS {
            assert!(REQUIRED_KEYS.contains(&output_key(artifact)), "{artifact}");
        }
    }
}
