//! Frame sources: where each frame's sensor input and metadata come from.
//!
//! A [`FrameSource`] yields [`FrameInput`]s strictly in order.  Two sources
//! ship with the runtime:
//!
//! - [`VecFrameSource`] – frames built in memory (tests, embedding callers).
//! - [`DirFrameSource`] – one directory per frame on disk, each holding a
//!   `frame.json` descriptor plus raw little-endian sensor buffers.
//!
//! # `frame.json`
//!
//! ```json
//! {
//!   "timestamp": 1533151603.547,
//!   "ego_pose": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
//!   "output_dir": "optional/override",
//!   "sensors": [
//!     { "name": "proposals", "shape": [2, 260], "dtype": "f32", "file": "proposals.bin" }
//!   ]
//! }
//! ```
//!
//! `output_dir` defaults to the frame directory itself; relative paths are
//! resolved against it.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use streammem_memory::FrameAnchor;
use streammem_perception::EgoPose;
use streammem_types::{DType, StreamError, Tensor};
use tracing::debug;

/// Descriptor file expected in every frame directory.
pub const FRAME_DESCRIPTOR: &str = "frame.json";

// ─────────────────────────────────────────────────────────────────────────────
// SensorInput / FrameInput
// ─────────────────────────────────────────────────────────────────────────────

/// Named sensor tensors for one frame.  Opaque to everything but the
/// inference unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorInput {
    tensors: BTreeMap<String, Tensor>,
}

impl SensorInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.tensors.insert(name.into(), tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// One frame as handed to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInput {
    /// Position in the sequence, starting at 0.
    pub index: usize,
    /// Seconds.
    pub timestamp: f64,
    /// Ego → global at `timestamp`.
    pub ego_pose: EgoPose,
    /// Root for this frame's artifacts; dumps land in `<output_dir>/out/`.
    pub output_dir: PathBuf,
    pub sensors: SensorInput,
}

impl FrameInput {
    pub fn new(index: usize, timestamp: f64, ego_pose: EgoPose, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            timestamp,
            ego_pose,
            output_dir: output_dir.into(),
            sensors: SensorInput::new(),
        }
    }

    pub fn with_sensors(mut self, sensors: SensorInput) -> Self {
        self.sensors = sensors;
        self
    }

    /// The coordinate frame memory is expressed in while this frame runs.
    pub fn anchor(&self) -> FrameAnchor {
        FrameAnchor {
            timestamp: self.timestamp,
            ego_pose: self.ego_pose,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameSource
// ─────────────────────────────────────────────────────────────────────────────

/// Supplies frames in sequence order.
///
/// `None` marks the end of the sequence; an `Err` aborts the run.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<FrameInput, StreamError>>;

    /// Frames still to come, when known.
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Frames held in memory.
#[derive(Debug, Default)]
pub struct VecFrameSource {
    frames: VecDeque<FrameInput>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<FrameInput>) -> Self {
        Self { frames: frames.into() }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Option<Result<FrameInput, StreamError>> {
        self.frames.pop_front().map(Ok)
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.frames.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DirFrameSource
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FrameDescriptor {
    timestamp: f64,
    ego_pose: [[f32; 4]; 4],
    #[serde(default)]
    output_dir: Option<PathBuf>,
    #[serde(default)]
    sensors: Vec<SensorDescriptor>,
}

#[derive(Debug, Deserialize)]
struct SensorDescriptor {
    name: String,
    shape: Vec<usize>,
    #[serde(default = "default_dtype")]
    dtype: DType,
    file: PathBuf,
}

fn default_dtype() -> DType {
    DType::F32
}

/// Reads frames from `<root>/<frame dir>/frame.json`.
///
/// Frame directories are every subdirectory of `root` that contains a
/// descriptor, taken in lexicographic order, at most `num_frames` of them.
/// Descriptors are parsed lazily, one per [`next_frame`](FrameSource::next_frame).
#[derive(Debug)]
pub struct DirFrameSource {
    dirs: VecDeque<PathBuf>,
    next_index: usize,
}

impl DirFrameSource {
    pub fn open(root: &Path, num_frames: usize) -> Result<Self, StreamError> {
        let entries = fs::read_dir(root)
            .map_err(|e| StreamError::Source(format!("cannot list `{}`: {e}", root.display())))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StreamError::Source(format!("cannot list `{}`: {e}", root.display())))?;
            let path = entry.path();
            if path.is_dir() && path.join(FRAME_DESCRIPTOR).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        if dirs.len() < num_frames {
            return Err(StreamError::Source(format!(
                "`{}` holds {} frame directories, {num_frames} requested",
                root.display(),
                dirs.len()
            )));
        }
        dirs.truncate(num_frames);
        debug!(root = %root.display(), frames = dirs.len(), "frame directories discovered");
        Ok(Self {
            dirs: dirs.into(),
            next_index: 0,
        })
    }

    fn load(&self, index: usize, dir: &Path) -> Result<FrameInput, StreamError> {
        let descriptor_path = dir.join(FRAME_DESCRIPTOR);
        let raw = fs::read_to_string(&descriptor_path)
            .map_err(|e| StreamError::Source(format!("frame {index}: cannot read `{}`: {e}", descriptor_path.display())))?;
        let descriptor: FrameDescriptor = serde_json::from_str(&raw)
            .map_err(|e| StreamError::Source(format!("frame {index}: malformed `{}`: {e}", descriptor_path.display())))?;

        let mut sensors = SensorInput::new();
        for sensor in &descriptor.sensors {
            let path = dir.join(&sensor.file);
            let bytes = fs::read(&path).map_err(|e| {
                StreamError::Source(format!("frame {index}: cannot read sensor `{}` ({}): {e}", sensor.name, path.display()))
            })?;
            let tensor = Tensor::from_le_bytes(sensor.shape.clone(), sensor.dtype, &bytes)
                .map_err(|e| StreamError::Source(format!("frame {index}: sensor `{}`: {e}", sensor.name)))?;
            sensors.insert(sensor.name.clone(), tensor);
        }

        let output_dir = match descriptor.output_dir {
            Some(p) if p.is_absolute() => p,
            Some(p) => dir.join(p),
            None => dir.to_path_buf(),
        };
        Ok(FrameInput {
            index,
            timestamp: descriptor.timestamp,
            ego_pose: EgoPose::from_rows(descriptor.ego_pose),
            output_dir,
            sensors,
        })
    }
}

impl FrameSource for DirFrameSource {
    fn next_frame(&mut self) -> Option<Result<FrameInput, StreamError>> {
        let dir = self.dirs.pop_front()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(self.load(index, &dir))
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.dirs.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
