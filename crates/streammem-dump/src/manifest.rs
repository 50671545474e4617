//! Run manifest: a JSON record of what a run wrote.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DumpError;

/// Artifacts written for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub index: usize,
    pub output_dir: PathBuf,
    /// File names relative to `<output_dir>/out/`.
    pub artifacts: Vec<String>,
}

/// Summary of one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub provenance_tag: String,
    pub pre_capacity: usize,
    pub post_capacity: usize,
    pub hidden_dim: usize,
    pub frames: Vec<FrameRecord>,
}

impl RunManifest {
    /// A manifest for a run starting now, with a fresh run id.
    pub fn begin(provenance_tag: &str, pre_capacity: usize, post_capacity: usize, hidden_dim: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            provenance_tag: provenance_tag.to_string(),
            pre_capacity,
            post_capacity,
            hidden_dim,
            frames: Vec::new(),
        }
    }

    pub fn record_frame(&mut self, index: usize, output_dir: &Path, written: &[PathBuf]) {
        let artifacts = written
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        self.frames.push(FrameRecord {
            index,
            output_dir: output_dir.to_path_buf(),
            artifacts,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn save(&self, path: &Path) -> Result<(), DumpError> {
        let raw = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| DumpError::Io {
                artifact: "run_manifest".to_string(),
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| DumpError::Io {
            artifact: "run_manifest".to_string(),
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, DumpError> {
        let raw = fs::read_to_string(path).map_err(|source| DumpError::Io {
            artifact: "run_manifest".to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
