//! Pairwise comparison of two implementations' dumps.
//!
//! Files in one artifact directory are grouped by artifact name; for each
//! name the `left` and `right` provenance tags are paired and compared as
//! little-endian `f32` buffers with an absolute tolerance.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::DumpError;
use crate::naming::{ArtifactFile, parse_artifact_file_name};

const F32_WIDTH: usize = 4;

/// Outcome for one artifact name.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffStatus {
    /// Every element within tolerance.
    Match { max_abs_diff: f32 },
    /// Same size, some elements outside tolerance.
    Mismatch {
        max_abs_diff: f32,
        mismatched: usize,
        total: usize,
    },
    /// Shapes encoded in the two file names differ.
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
    /// File sizes disagree with each other or with the encoded shape.
    SizeMismatch { left: usize, right: usize },
    MissingLeft,
    MissingRight,
}

impl DiffStatus {
    pub fn is_match(&self) -> bool {
        matches!(self, DiffStatus::Match { .. })
    }
}

/// One row of a [`CompareReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDiff {
    pub artifact: String,
    pub status: DiffStatus,
}

/// Per-artifact results, sorted by artifact name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompareReport {
    pub diffs: Vec<ArtifactDiff>,
}

impl CompareReport {
    /// `true` when every artifact matched.
    pub fn is_clean(&self) -> bool {
        self.diffs.iter().all(|d| d.status.is_match())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArtifactDiff> {
        self.diffs.iter().filter(|d| !d.status.is_match())
    }
}

impl fmt::Display for CompareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diffs {
            match &d.status {
                DiffStatus::Match { max_abs_diff } => {
                    writeln!(f, "ok        {} (max |Δ| = {max_abs_diff:e})", d.artifact)?
                }
                DiffStatus::Mismatch {
                    max_abs_diff,
                    mismatched,
                    total,
                } => writeln!(
                    f,
                    "MISMATCH  {} ({mismatched}/{total} elements, max |Δ| = {max_abs_diff:e})",
                    d.artifact
                )?,
                DiffStatus::ShapeMismatch { left, right } => {
                    writeln!(f, "SHAPE     {} ({left:?} vs {right:?})", d.artifact)?
                }
                DiffStatus::SizeMismatch { left, right } => {
                    writeln!(f, "SIZE      {} ({left} vs {right} bytes)", d.artifact)?
                }
                DiffStatus::MissingLeft => writeln!(f, "MISSING   {} (left)", d.artifact)?,
                DiffStatus::MissingRight => writeln!(f, "MISSING   {} (right)", d.artifact)?,
            }
        }
        Ok(())
    }
}

/// Compare every artifact tagged `left_tag` in `dir` against its
/// `right_tag` partner.
pub fn compare_dumps(
    dir: &Path,
    left_tag: &str,
    right_tag: &str,
    tolerance: f32,
) -> Result<CompareReport, DumpError> {
    let io_err = |path: &Path, source: std::io::Error| DumpError::Io {
        artifact: "*".to_string(),
        path: path.to_path_buf(),
        source,
    };

    let mut pairs: BTreeMap<String, (Option<(ArtifactFile, PathBuf)>, Option<(ArtifactFile, PathBuf)>)> =
        BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name();
        let Some(parsed) = parse_artifact_file_name(&name.to_string_lossy()) else {
            continue;
        };
        let slot = pairs.entry(parsed.artifact.clone()).or_default();
        if parsed.tag == left_tag {
            slot.0 = Some((parsed, entry.path()));
        } else if parsed.tag == right_tag {
            slot.1 = Some((parsed, entry.path()));
        }
    }

    let mut diffs = Vec::new();
    for (artifact, pair) in pairs {
        let status = match pair {
            (None, None) => continue,
            (None, Some(_)) => DiffStatus::MissingLeft,
            (Some(_), None) => DiffStatus::MissingRight,
            (Some((lf, lp)), Some((rf, rp))) => {
                if lf.shape != rf.shape {
                    DiffStatus::ShapeMismatch {
                        left: lf.shape,
                        right: rf.shape,
                    }
                } else {
                    let left = fs::read(&lp).map_err(|e| io_err(lp.as_path(), e))?;
                    let right = fs::read(&rp).map_err(|e| io_err(rp.as_path(), e))?;
                    compare_buffers(&left, &right, lf.element_count(), tolerance)
                }
            }
        };
        diffs.push(ArtifactDiff { artifact, status });
    }
    Ok(CompareReport { diffs })
}

fn compare_buffers(left: &[u8], right: &[u8], elements: Option<usize>, tolerance: f32) -> DiffStatus {
    let elements = match elements {
        Some(n) if n.checked_mul(F32_WIDTH) == Some(left.len()) && left.len() == right.len() => n,
        _ => {
            return DiffStatus::SizeMismatch {
                left: left.len(),
                right: right.len(),
            };
        }
    };
    let mut max_abs_diff = 0.0f32;
    let mut mismatched = 0;
    for (a, b) in left.chunks_exact(F32_WIDTH).zip(right.chunks_exact(F32_WIDTH)) {
        let a = f32::from_le_bytes([a[0], a[1], a[2], a[3]]);
        let b = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if a == b || (a.is_nan() && b.is_nan()) {
            continue;
        }
        let diff = (a - b).abs();
        if diff.is_nan() || diff > tolerance {
            mismatched += 1;
        }
        if diff.is_finite() {
            max_abs_diff = max_abs_diff.max(diff);
        } else {
            max_abs_diff = f32::INFINITY;
        }
    }
    if mismatched == 0 {
        DiffStatus::Match { max_abs_diff }
    } else {
        DiffStatus::Mismatch {
            max_abs_diff,
            mismatched,
            total: elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::artifact_file_name;

    fn put(dir: &Path, artifact: &str, shape: &[usize], tag: &str, values: &[f32]) {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(dir.join(artifact_file_name(artifact, shape, tag)), bytes).unwrap();
    }

    #[test]
    fn identical_dumps_are_clean() {
        let dir = tempfile::tempdir().expect("tmp dir");
        put(dir.path(), "out_outs_dec", &[1, 2], "rs", &[1.0, f32::INFINITY]);
        put(dir.path(), "out_outs_dec", &[1, 2], "pth", &[1.0, f32::INFINITY]);
        let report = compare_dumps(dir.path(), "rs", "pth", 0.0).unwrap();
        assert!(report.is_clean(), "{report}");
        assert_eq!(report.diffs.len(), 1);
    }

    #[test]
    fn tolerance_separates_match_from_mismatch() {
        let dir = tempfile::tempdir().expect("tmp dir");
        put(dir.path(), "a", &[3], "rs", &[1.0, 2.0, 3.0]);
        put(dir.path(), "a", &[3], "pth", &[1.0, 2.001, 3.5]);

        let loose = compare_dumps(dir.path(), "rs", "pth", 1.0).unwrap();
        assert!(loose.is_clean());

        let strict = compare_dumps(dir.path(), "rs", "pth", 0.01).unwrap();
        match &strict.diffs[0].status {
            DiffStatus::Mismatch {
                mismatched, total, ..
            } => {
                assert_eq!(*mismatched, 1);
                assert_eq!(*total, 3);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn missing_and_shape_problems_are_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        put(dir.path(), "only_left", &[1], "rs", &[0.0]);
        put(dir.path(), "only_right", &[1], "pth", &[0.0]);
        put(dir.path(), "resized", &[2], "rs", &[0.0, 0.0]);
        put(dir.path(), "resized", &[1], "pth", &[0.0]);
        fs::write(dir.path().join("frame.json"), b"{}").unwrap();

        let report = compare_dumps(dir.path(), "rs", "pth", 0.0).unwrap();
        let status = |name: &str| {
            report
                .diffs
                .iter()
                .find(|d| d.artifact == name)
                .map(|d| d.status.clone())
                .unwrap()
        };
        assert_eq!(status("only_left"), DiffStatus::MissingRight);
        assert_eq!(status("only_right"), DiffStatus::MissingLeft);
        assert!(matches!(status("resized"), DiffStatus::ShapeMismatch { .. }));
        assert_eq!(report.failures().count(), 3);
    }

    #[test]
    fn file_name_dims_that_overflow_are_skipped() {
        let dir = tempfile::tempdir().expect("tmp dir");
        put(dir.path(), "a", &[1], "rs", &[0.0]);
        put(dir.path(), "a", &[1], "pth", &[0.0]);
        fs::write(dir.path().join("x_18446744073709551615x2_rs.bin"), [0u8; 8]).unwrap();
        fs::write(dir.path().join("x_18446744073709551615x2_pth.bin"), [0u8; 8]).unwrap();

        let report = compare_dumps(dir.path(), "rs", "pth", 0.0).unwrap();
        assert_eq!(report.diffs.len(), 1);
        assert!(report.is_clean(), "{report}");
    }

    #[test]
    fn buffer_size_overflow_is_a_size_mismatch() {
        let status = compare_buffers(&[0u8; 8], &[0u8; 8], Some(usize::MAX / 2), 0.0);
        assert_eq!(status, DiffStatus::SizeMismatch { left: 8, right: 8 });
        let status = compare_buffers(&[0u8; 8], &[0u8; 8], None, 0.0);
        assert_eq!(status, DiffStatus::SizeMismatch { left: 8, right: 8 });
    }

    #[test]
    fn truncated_file_is_a_size_mismatch() {
        let dir = tempfile::tempdir().expect("tmp dir");
        put(dir.path(), "a", &[2], "rs", &[0.0, 0.0]);
        put(dir.path(), "a", &[2], "pth", &[0.0]);
        let report = compare_dumps(dir.path(), "rs", "pth", 0.0).unwrap();
        assert_eq!(report.diffs[0].status, DiffStatus::SizeMismatch { left: 8, right: 4 });
    }
}
