//! Point-cloud range normalization.
//!
//! Reference points are stored normalized to `[0, 1]` along each axis of the
//! detection range.  Ego-motion compensation needs metric coordinates, so
//! every transform goes denormalize → transform → normalize.

use serde::{Deserialize, Serialize};

use crate::transform::Vec3;

/// Axis-aligned detection range in the ego frame, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PcRange {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for PcRange {
    /// The nuScenes range used by the reference detector.
    fn default() -> Self {
        Self {
            min: Vec3::new(-51.2, -51.2, -5.0),
            max: Vec3::new(51.2, 51.2, 3.0),
        }
    }
}

impl PcRange {
    /// Build from the conventional flat `[x_min, y_min, z_min, x_max, y_max, z_max]`.
    pub fn from_flat(r: [f32; 6]) -> Self {
        Self {
            min: Vec3::new(r[0], r[1], r[2]),
            max: Vec3::new(r[3], r[4], r[5]),
        }
    }

    /// `false` when any axis has zero or negative extent.
    pub fn is_valid(&self) -> bool {
        self.max.x > self.min.x && self.max.y > self.min.y && self.max.z > self.min.z
    }

    pub fn denormalize(&self, p: Vec3) -> Vec3 {
        Vec3::new(
            p.x * (self.max.x - self.min.x) + self.min.x,
            p.y * (self.max.y - self.min.y) + self.min.y,
            p.z * (self.max.z - self.min.z) + self.min.z,
        )
    }

    pub fn normalize(&self, p: Vec3) -> Vec3 {
        Vec3::new(
            (p.x - self.min.x) / (self.max.x - self.min.x),
            (p.y - self.min.y) / (self.max.y - self.min.y),
            (p.z - self.min.z) / (self.max.z - self.min.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_of_unit_cube_maps_to_range_centre() {
        let range = PcRange::default();
        let p = range.denormalize(Vec3::new(0.5, 0.5, 0.5));
        assert!(p.x.abs() < 1e-5);
        assert!(p.y.abs() < 1e-5);
        assert!((p.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_inverts_denormalize() {
        let range = PcRange::from_flat([-10.0, -20.0, -2.0, 10.0, 20.0, 2.0]);
        let n = Vec3::new(0.25, 0.8, 0.1);
        let back = range.normalize(range.denormalize(n));
        assert!((back.x - n.x).abs() < 1e-6);
        assert!((back.y - n.y).abs() < 1e-6);
        assert!((back.z - n.z).abs() < 1e-6);
    }

    #[test]
    fn degenerate_range_is_invalid() {
        let range = PcRange::from_flat([0.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        assert!(!range.is_valid());
        assert!(PcRange::default().is_valid());
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{"min":{"x":-1.0,"y":-1.0,"z":-1.0},"max":{"x":1.0,"y":1.0,"z":1.0}}"#;
        let range: PcRange = serde_json::from_str(json).unwrap();
        assert_eq!(range.max.z, 1.0);
    }
}
