//! `streammem-perception` – ego-motion geometry.
//!
//! Object hypotheses carried across frames live in the ego frame of the frame
//! that last touched them.  Before they can be merged with fresh detections
//! they must be re-expressed in the current ego frame; this crate provides the
//! math for that.
//!
//! # Modules
//!
//! - [`transform`] – [`EgoPose`][transform::EgoPose]: a 4×4 homogeneous
//!   rigid-body transform, plus the [`Vec3`][transform::Vec3] /
//!   [`Quaternion`][transform::Quaternion] primitives used to build one.
//! - [`range`] – [`PcRange`][range::PcRange]: the point-cloud range used to
//!   map metric positions into the normalized `[0, 1]³` reference-point frame.

pub mod range;
pub mod transform;

pub use range::PcRange;
pub use transform::{EgoPose, Quaternion, Vec3};
