//! [`ReplayInference`] – re-emit another implementation's dumps.
//!
//! For each frame, every `<output_dir>/out/*_<tag>.bin` file is loaded as an
//! f32 tensor and keyed by its artifact name (`out_` prefix stripped), then
//! assembled with [`DetectionOutput::from_tensor_map`].  Running the frame
//! loop over a replayed reference therefore re-checks its shapes against the
//! declared head and writes the same tensors under this run's tag, ready for
//! `compare_dumps`.

use std::collections::BTreeMap;
use std::fs;

use streammem_dump::{ArtifactWriter, parse_artifact_file_name};
use streammem_memory::MemorySnapshot;
use streammem_types::{DType, StreamError, Tensor};
use tracing::{debug, warn};

use crate::artifacts::{INPUT_MEMORY_PREFIX, output_key};
use crate::frame_source::FrameInput;
use crate::inference::{DetectionOutput, InferenceUnit};

/// Loads forward outputs from dumps tagged `tag`.
#[derive(Debug, Clone)]
pub struct ReplayInference {
    tag: String,
}

impl ReplayInference {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn load(&self, input: &FrameInput) -> Result<BTreeMap<String, Tensor>, StreamError> {
        let frame = input.index;
        let dir = ArtifactWriter::artifact_dir(&input.output_dir);
        let io_err = |source: std::io::Error| StreamError::Io {
            frame,
            artifact: format!("*_{}", self.tag),
            path: dir.clone(),
            source,
        };

        let mut map = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let Some(file) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_artifact_file_name)
            else {
                continue;
            };
            if file.tag != self.tag || file.artifact.starts_with(INPUT_MEMORY_PREFIX) {
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| StreamError::Io {
                frame,
                artifact: file.artifact.clone(),
                path: path.clone(),
                source,
            })?;
            let tensor = Tensor::from_le_bytes(file.shape.clone(), DType::F32, &bytes)
                .map_err(|e| StreamError::contract(frame, file.artifact.clone(), format!("{e} (dumps are read as f32)")))?;
            let key = output_key(&file.artifact).to_string();
            debug!(frame, artifact = %file.artifact, shape = %tensor.shape_label(), "replayed artifact loaded");
            if map.insert(key, tensor).is_some() {
                return Err(StreamError::contract(
                    frame,
                    file.artifact.clone(),
                    format!("more than one `{}` dump tagged `{}`", file.artifact, self.tag),
                ));
            }
        }
        Ok(map)
    }
}

impl InferenceUnit for ReplayInference {
    fn name(&self) -> &str {
        "replay"
    }

    fn forward(&mut self, input: &FrameInput, memory: &MemorySnapshot) -> Result<DetectionOutput, StreamError> {
        let map = self.load(input)?;
        let output = DetectionOutput::from_tensor_map(input.index, map)?;
        if output.next_memory.capacity() != memory.capacity() {
            warn!(
                frame = input.index,
                fed = memory.capacity(),
                replayed = output.next_memory.capacity(),
                "replayed memory capacity differs from the bank"
            );
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::frame_artifacts;
    use streammem_perception::EgoPose;

    fn reference_output() -> DetectionOutput {
        let mut post = MemorySnapshot::empty(3, 4).into_slots();
        post[0] = streammem_memory::ObjectHypothesis::fresh(vec![1.0; 4], [0.5; 3], [0.0; 2]);
        DetectionOutput {
            all_cls_scores: Tensor::from_f32(vec![1, 1, 2, 1], vec![0.9, 0.1]).unwrap(),
            all_bbox_preds: Tensor::zeros(vec![1, 1, 2, 10]),
            outs_dec: Tensor::zeros(vec![1, 2, 4]),
            rec_ego_pose: Tensor::zeros(vec![1, 3, 4, 4]),
            post_memory: MemorySnapshot::from_slots(4, post.clone(), None).unwrap(),
            next_memory: MemorySnapshot::from_slots(4, post[..2].to_vec(), None).unwrap(),
        }
    }

    #[test]
    fn replays_written_dump() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let expected = reference_output();
        let named = frame_artifacts(&expected, &MemorySnapshot::empty(2, 4)).unwrap();
        ArtifactWriter::new("pth").unwrap().write(dir.path(), 0, &named).unwrap();
        // A dump under another tag must be ignored.
        ArtifactWriter::new("rs").unwrap().write(dir.path(), 0, &named[..1]).unwrap();

        let input = FrameInput::new(0, 0.0, EgoPose::identity(), dir.path());
        let out = ReplayInference::new("pth")
            .forward(&input, &MemorySnapshot::empty(2, 4))
            .unwrap();
        assert_eq!(out.all_cls_scores, expected.all_cls_scores);
        assert_eq!(out.next_memory.slots()[0].embedding, vec![1.0; 4]);
        assert_eq!(out.post_memory.capacity(), 3);
    }

    #[test]
    fn incomplete_dump_is_a_contract_violation() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let named = frame_artifacts(&reference_output(), &MemorySnapshot::empty(2, 4)).unwrap();
        ArtifactWriter::new("pth").unwrap().write(dir.path(), 0, &named[1..]).unwrap();

        let input = FrameInput::new(2, 0.0, EgoPose::identity(), dir.path());
        let err = ReplayInference::new("pth")
            .forward(&input, &MemorySnapshot::empty(2, 4))
            .unwrap_err();
        assert!(
            matches!(err, StreamError::ContractViolation { frame: 2, ref field, .. } if field == "all_cls_scores"),
            "{err}"
        );
    }

    #[test]
    fn wider_than_f32_dump_is_named_in_the_violation() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let named = frame_artifacts(&reference_output(), &MemorySnapshot::empty(2, 4)).unwrap();
        ArtifactWriter::new("pth").unwrap().write(dir.path(), 0, &named).unwrap();
        // Overwrite one artifact with f64 bytes under the same f32-sized name.
        let out = dir.path().join("out");
        let ts = std::fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("out_mem_timestamp_"))
            .unwrap();
        let wide: Vec<u8> = [0.0f64, 0.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&ts, wide).unwrap();

        let input = FrameInput::new(0, 0.0, EgoPose::identity(), dir.path());
        let err = ReplayInference::new("pth")
            .forward(&input, &MemorySnapshot::empty(2, 4))
            .unwrap_err();
        assert!(
            matches!(&err, StreamError::ContractViolation { field, detail, .. }
                if field == "out_mem_timestamp" && detail.contains("f32")),
            "{err}"
        );
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let input = FrameInput::new(0, 0.0, EgoPose::identity(), dir.path().join("nope"));
        let err = ReplayInference::new("pth")
            .forward(&input, &MemorySnapshot::empty(2, 4))
            .unwrap_err();
        assert!(matches!(err, StreamError::Io { .. }));
    }
}
