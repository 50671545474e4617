//! [`FrameRunner`] – the strictly sequential frame loop.
//!
//! Each frame goes through five steps:
//!
//! 1. **Snapshot** – read the [`MemoryBank`]'s current state.
//! 2. **Forward** – call the [`InferenceUnit`] with the frame's sensor input
//!    and that snapshot.
//! 3. **Validate** – check the returned [`DetectionOutput`] against the
//!    declared [`HeadShape`]; a short or mis-shaped output aborts the run.
//! 4. **Commit** – replace the bank's state with the output's next memory.
//! 5. **Dump** – write every artifact under the frame's output directory.
//!
//! Frame *i + 1* is not pulled from the source until frame *i* has been
//! committed and dumped.  On any error the run stops at the offending frame
//! and the bank keeps its last committed state, reachable through
//! [`FrameRunner::bank`].
//!
//! # Cancellation
//!
//! [`FrameRunner::with_shutdown`] installs a flag that is checked between
//! frames only.  A raised flag ends the run with
//! [`StreamError::Cancelled`] after the last fully written frame.
//!
//! # Example
//!
//! ```rust,no_run
//! use streammem_perception::PcRange;
//! use streammem_runtime::{FrameRunner, RunnerConfig, SyntheticInference, VecFrameSource};
//!
//! let config = RunnerConfig::default();
//! let unit = SyntheticInference::new(config.head, PcRange::default(), 0).unwrap();
//! let mut runner = FrameRunner::new(config, unit).unwrap();
//! let summary = runner.run(&mut VecFrameSource::new(Vec::new())).unwrap();
//! assert!(summary.frames.is_empty());
//! ```

use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use streammem_dump::{ArtifactWriter, RunManifest};
use streammem_memory::MemoryBank;
use streammem_types::StreamError;
use tracing::{debug, info, info_span, warn};

use crate::artifacts::frame_artifacts;
use crate::frame_source::{FrameInput, FrameSource};
use crate::inference::{DetectionOutput, HeadShape, InferenceUnit};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a run needs besides the unit and the frames.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub head: HeadShape,
    /// Tag appended to every artifact file name.
    pub provenance_tag: String,
    /// Where to write the run manifest, if anywhere.
    pub manifest_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            head: HeadShape::default(),
            provenance_tag: "rs".to_string(),
            manifest_path: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summaries
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one committed and dumped frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub index: usize,
    pub output_dir: PathBuf,
    /// Paths written, in write order.
    pub artifacts: Vec<PathBuf>,
    /// Live slots in the committed memory.
    pub live_memory: usize,
    pub elapsed: Duration,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames: Vec<FrameSummary>,
    pub manifest: RunManifest,
}

impl RunSummary {
    pub fn artifact_count(&self) -> usize {
        self.frames.iter().map(|f| f.artifacts.len()).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one [`InferenceUnit`] over a [`FrameSource`].
pub struct FrameRunner<U: InferenceUnit> {
    config: RunnerConfig,
    unit: U,
    bank: MemoryBank,
    writer: ArtifactWriter,
    shutdown: Option<Arc<AtomicBool>>,
    manifest: RunManifest,
    completed: usize,
}

impl<U: InferenceUnit> FrameRunner<U> {
    /// Build a runner with an empty (all-sentinel) memory bank.
    pub fn new(config: RunnerConfig, unit: U) -> Result<Self, StreamError> {
        let head = config.head;
        let bank =
            MemoryBank::new(head.pre_capacity, head.hidden_dim).map_err(|e| StreamError::Config(e.to_string()))?;
        let writer = ArtifactWriter::new(config.provenance_tag.clone()).map_err(|e| StreamError::Config(e.to_string()))?;
        let manifest = RunManifest::begin(&config.provenance_tag, head.pre_capacity, head.post_capacity, head.hidden_dim);
        Ok(Self {
            config,
            unit,
            bank,
            writer,
            shutdown: None,
            manifest,
            completed: 0,
        })
    }

    /// Stop between frames once `flag` is raised.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The bank's state as of the last committed frame.
    pub fn bank(&self) -> &MemoryBank {
        &self.bank
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    /// Frames committed and dumped so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Process one frame end to end.
    ///
    /// Frames must arrive in order: `input.index` has to equal
    /// [`completed`](Self::completed).
    pub fn run_frame(&mut self, input: &FrameInput) -> Result<FrameSummary, StreamError> {
        let frame = input.index;
        if frame != self.completed {
            return Err(StreamError::Source(format!(
                "frame {frame} arrived out of order; expected frame {}",
                self.completed
            )));
        }
        let started = Instant::now();

        // ── 1. Snapshot ───────────────────────────────────────────────────────
        let fed = self.bank.snapshot();

        // ── 2. Forward ────────────────────────────────────────────────────────
        let output: DetectionOutput = self.unit.forward(input, &fed)?;

        // ── 3. Validate ───────────────────────────────────────────────────────
        output.validate(frame, &self.config.head)?;

        // ── 4. Commit ─────────────────────────────────────────────────────────
        self.bank
            .update(output.next_memory.clone())
            .map_err(|e| StreamError::contract(frame, "mem_embedding", e.to_string()))?;

        // ── 5. Dump ───────────────────────────────────────────────────────────
        let named = frame_artifacts(&output, &fed)?;
        let written = self
            .writer
            .write(&input.output_dir, frame, &named)
            .map_err(|e| e.at_frame(frame))?;
        self.manifest.record_frame(frame, &input.output_dir, &written);
        self.completed += 1;

        let summary = FrameSummary {
            index: frame,
            output_dir: input.output_dir.clone(),
            artifacts: written,
            live_memory: self.bank.last_committed().live_count(),
            elapsed: started.elapsed(),
        };
        info!(
            frame,
            artifacts = summary.artifacts.len(),
            live_memory = summary.live_memory,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "frame committed"
        );
        Ok(summary)
    }

    /// Run every frame `source` yields, in order.
    ///
    /// The manifest (when configured) is written on success and on
    /// cancellation; a failed run leaves it unwritten.
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<RunSummary, StreamError> {
        info!(
            unit = self.unit.name(),
            tag = %self.config.provenance_tag,
            pre_capacity = self.config.head.pre_capacity,
            post_capacity = self.config.head.post_capacity,
            frames = ?source.remaining(),
            "run started"
        );
        let mut frames = Vec::new();
        loop {
            if self.shutdown_requested() {
                warn!(completed = self.completed, "shutdown requested; stopping between frames");
                self.persist_manifest()?;
                return Err(StreamError::Cancelled {
                    completed: self.completed,
                });
            }
            let Some(next) = source.next_frame() else {
                break;
            };
            let input = next?;
            let span = info_span!("frame", index = input.index);
            let _entered = span.enter();
            frames.push(self.run_frame(&input)?);
        }

        self.manifest.finish();
        self.persist_manifest()?;
        info!(frames = frames.len(), run_id = %self.manifest.run_id, "run finished");
        Ok(RunSummary {
            frames,
            manifest: self.manifest.clone(),
        })
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|f| f.load(Ordering::Acquire))
    }

    fn persist_manifest(&self) -> Result<(), StreamError> {
        let Some(path) = &self.config.manifest_path else {
            return Ok(());
        };
        self.manifest.save(path).map_err(|e| e.at_frame(self.completed))?;
        debug!(path = %path.display(), "run manifest written");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
