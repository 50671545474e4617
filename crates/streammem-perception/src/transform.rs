//! Ego-pose transforms.
//!
//! An [`EgoPose`] is a row-major 4×4 homogeneous matrix mapping points from
//! the ego frame at some timestamp into a fixed global frame.  Given the ego
//! poses of two consecutive frames, [`EgoPose::relative_motion`] yields the
//! transform that carries a point from the previous ego frame into the current
//! one.
//!
//! # Example
//!
//! ```rust
//! use streammem_perception::transform::{EgoPose, Quaternion, Vec3};
//!
//! // The vehicle drove 2 m forward between frames.
//! let prev = EgoPose::from_translation_rotation(Vec3::zero(), Quaternion::identity());
//! let cur = EgoPose::from_translation_rotation(Vec3::new(2.0, 0.0, 0.0), Quaternion::identity());
//!
//! // A parked car 10 m ahead in the previous frame is 8 m ahead now.
//! let delta = EgoPose::relative_motion(&prev, &cur);
//! let p = delta.transform_point(Vec3::new(10.0, 0.0, 0.0));
//! assert!((p.x - 8.0).abs() < 1e-5);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn norm_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about the vertical axis.
    pub fn from_yaw(angle: f32) -> Self {
        let half = angle * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Row-major 3×3 rotation matrix.
    pub fn to_rotation_matrix(self) -> [[f32; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EgoPose
// ────────────────────────────────────────────────────────────────────────────

/// A 4×4 homogeneous rigid-body transform, stored row-major.
///
/// The all-zero matrix is a valid value: it marks a memory slot that was never
/// written (see [`EgoPose::zeros`]) and is left untouched by compensation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EgoPose(pub [f32; 16]);

impl Default for EgoPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl EgoPose {
    pub fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Self(m)
    }

    /// The all-zero matrix used for never-written memory slots.
    pub fn zeros() -> Self {
        Self([0.0; 16])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        let mut m = [0.0; 16];
        for (r, row) in rows.iter().enumerate() {
            m[r * 4..r * 4 + 4].copy_from_slice(row);
        }
        Self(m)
    }

    pub fn from_translation_rotation(translation: Vec3, rotation: Quaternion) -> Self {
        let r = rotation.to_rotation_matrix();
        Self::from_rows([
            [r[0][0], r[0][1], r[0][2], translation.x],
            [r[1][0], r[1][1], r[1][2], translation.y],
            [r[2][0], r[2][1], r[2][2], translation.z],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    #[inline]
    fn at(&self, r: usize, c: usize) -> f32 {
        self.0[r * 4 + c]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.at(0, 3), self.at(1, 3), self.at(2, 3))
    }

    /// Matrix product `self · other`: `other` applied first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let mut m = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                m[r * 4 + c] = (0..4).map(|k| self.at(r, k) * other.at(k, c)).sum();
            }
        }
        Self(m)
    }

    /// Inverse of a rigid transform: `[Rᵀ | −Rᵀt]`.
    pub fn rigid_inverse(&self) -> Self {
        let t = self.translation();
        let mut m = [0.0; 16];
        for r in 0..3 {
            for c in 0..3 {
                m[r * 4 + c] = self.at(c, r);
            }
            m[r * 4 + 3] = -(self.at(0, r) * t.x + self.at(1, r) * t.y + self.at(2, r) * t.z);
        }
        m[15] = 1.0;
        Self(m)
    }

    /// Rotate then translate a point.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotate_vector(p).add(self.translation())
    }

    /// Apply only the rotation block.
    pub fn rotate_vector(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.at(0, 0) * v.x + self.at(0, 1) * v.y + self.at(0, 2) * v.z,
            self.at(1, 0) * v.x + self.at(1, 1) * v.y + self.at(1, 2) * v.z,
            self.at(2, 0) * v.x + self.at(2, 1) * v.y + self.at(2, 2) * v.z,
        )
    }

    /// Transform carrying points from the `prev` ego frame into the `cur` one:
    /// `cur⁻¹ · prev`.
    pub fn relative_motion(prev: &Self, cur: &Self) -> Self {
        cur.rigid_inverse().compose(prev)
    }

    /// Largest absolute element-wise difference, for tolerance checks.
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
