//! [`ArtifactWriter`] – writes one frame's tensors to disk.
//!
//! Each artifact becomes one file under `<frame_output_dir>/out/`.  Bytes are
//! first written to a `.tmp` sibling and then renamed into place, so a run
//! interrupted mid-frame never leaves a truncated file under an artifact's
//! final name.  Existing files are overwritten.  Only `f32` tensors are
//! accepted, since the file name is the only metadata a dump carries.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use streammem_types::{DType, Tensor};
use tracing::debug;

use crate::DumpError;
use crate::naming::{ARTIFACT_SUBDIR, artifact_file_name, validate_tag};

/// Writes named tensors as raw buffers tagged with one provenance tag.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    tag: String,
}

impl ArtifactWriter {
    pub fn new(tag: impl Into<String>) -> Result<Self, DumpError> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Self { tag })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Directory that receives a frame's artifacts.
    pub fn artifact_dir(frame_output_dir: &Path) -> PathBuf {
        frame_output_dir.join(ARTIFACT_SUBDIR)
    }

    /// Write every `(name, tensor)` pair for one frame.
    ///
    /// Returns the written paths in input order.  Duplicate names and non-`f32`
    /// tensors are rejected before anything is written.  The first I/O failure
    /// aborts the frame; files already written for earlier frames are
    /// untouched.
    pub fn write(
        &self,
        frame_output_dir: &Path,
        frame_index: usize,
        tensors: &[(String, Tensor)],
    ) -> Result<Vec<PathBuf>, DumpError> {
        let mut seen = HashSet::new();
        if let Some((name, _)) = tensors.iter().find(|(name, _)| !seen.insert(name.as_str())) {
            return Err(DumpError::DuplicateArtifact(name.clone()));
        }
        if let Some((name, tensor)) = tensors.iter().find(|(_, t)| t.dtype() != DType::F32) {
            return Err(DumpError::UnsupportedDType {
                artifact: name.clone(),
                dtype: tensor.dtype(),
            });
        }

        let dir = Self::artifact_dir(frame_output_dir);
        fs::create_dir_all(&dir).map_err(|source| DumpError::Io {
            artifact: ARTIFACT_SUBDIR.to_string(),
            path: dir.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(tensors.len());
        for (name, tensor) in tensors {
            let path = dir.join(artifact_file_name(name, tensor.shape(), &self.tag));
            write_whole_file(&path, &tensor.to_le_bytes()).map_err(|source| DumpError::Io {
                artifact: name.clone(),
                path: path.clone(),
                source,
            })?;
            debug!(
                frame = frame_index,
                artifact = %name,
                shape = %tensor.shape_label(),
                dtype = %tensor.dtype(),
                "artifact written"
            );
            written.push(path);
        }
        Ok(written)
    }
}

fn write_whole_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let result = write_and_sync(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        // Best effort; the original error is what gets reported.
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn write_and_sync(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)?;
    f.write_all(bytes)?;
    f.sync_all()
}
