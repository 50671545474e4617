//! `streammem-dump` – byte-exact artifact dumps.
//!
//! Every tensor a frame produces is written as a raw little-endian buffer
//! with no header.  Shape and provenance travel in the file name, so two
//! implementations' dumps of the same frame can be paired by name and diffed
//! byte-for-byte or within a numeric tolerance.
//!
//! # Modules
//!
//! - [`naming`] – the `<artifact>_<d0>x<d1>…_<tag>.bin` convention and its
//!   inverse.
//! - [`writer`] – [`ArtifactWriter`][writer::ArtifactWriter]: writes one
//!   frame's named tensors under `<frame_output_dir>/out/`.
//! - [`compare`] – [`compare_dumps`][compare::compare_dumps]: pairs two
//!   provenance tags' files in one directory and reports differences.
//! - [`manifest`] – [`RunManifest`][manifest::RunManifest]: JSON summary of
//!   one run.

pub mod compare;
pub mod manifest;
pub mod naming;
pub mod writer;

pub use compare::{CompareReport, DiffStatus, compare_dumps};
pub use manifest::{FrameRecord, RunManifest};
pub use naming::{ArtifactFile, artifact_file_name, parse_artifact_file_name, validate_tag};
pub use writer::ArtifactWriter;

use std::path::PathBuf;

use streammem_types::{DType, StreamError};
use thiserror::Error;

/// Errors raised while writing or reading dumps.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Invalid provenance tag `{0}`: must be non-empty without `_`, `/` or whitespace")]
    InvalidTag(String),

    #[error("Artifact `{0}` appears more than once in one frame")]
    DuplicateArtifact(String),

    /// Dumps carry no dtype header and are always read back as `f32`.
    #[error("Artifact `{artifact}` is {dtype}; dumps are f32 only")]
    UnsupportedDType { artifact: String, dtype: DType },

    #[error("I/O error on `{artifact}` ({}): {source}", path.display())]
    Io {
        artifact: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest serialization error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl DumpError {
    /// Attach the frame index and lift into the run-level error.
    pub fn at_frame(self, frame: usize) -> StreamError {
        match self {
            DumpError::Io {
                artifact,
                path,
                source,
            } => StreamError::Io {
                frame,
                artifact,
                path,
                source,
            },
            other => StreamError::contract(frame, "artifacts", other.to_string()),
        }
    }
}
