//! `streammem-runtime` – the frame loop.
//!
//! Drives a streaming detector over a fixed sequence of frames, carrying the
//! temporal memory from each frame to the next and dumping every output.
//!
//! # Modules
//!
//! - [`inference`] – the [`InferenceUnit`][inference::InferenceUnit]
//!   contract: sensor input plus memory snapshot in,
//!   [`DetectionOutput`][inference::DetectionOutput] out.
//! - [`artifacts`] – the per-frame artifact set and its mapping onto the
//!   reference dump names.
//! - [`frame_source`] – [`FrameInput`][frame_source::FrameInput] and the
//!   in-memory / on-disk [`FrameSource`][frame_source::FrameSource]s.
//! - [`synthetic`] – [`SyntheticInference`][synthetic::SyntheticInference]:
//!   a deterministic stand-in detector built on the reference memory policy.
//! - [`replay`] – [`ReplayInference`][replay::ReplayInference]: replays a
//!   reference implementation's dumps as forward outputs.
//! - [`frame_runner`] – [`FrameRunner`][frame_runner::FrameRunner]: the
//!   strictly sequential snapshot → forward → commit → dump loop.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP exporter.

pub mod artifacts;
pub mod frame_runner;
pub mod frame_source;
pub mod inference;
pub mod replay;
pub mod synthetic;
pub mod telemetry;

pub use frame_runner::{FrameRunner, FrameSummary, RunSummary, RunnerConfig};
pub use frame_source::{DirFrameSource, FrameInput, FrameSource, SensorInput, VecFrameSource};
pub use inference::{DetectionOutput, HeadShape, InferenceUnit};
pub use replay::ReplayInference;
pub use synthetic::SyntheticInference;
pub use telemetry::{TracerProviderGuard, init_tracing};
