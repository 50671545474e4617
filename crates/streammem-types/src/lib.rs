//! `streammem-types` – shared value types for the streaming memory verifier.
//!
//! Everything that crosses a crate boundary lives here: the flat [`Tensor`]
//! buffer that the inference unit produces and the artifact writer dumps, and
//! the global [`StreamError`] taxonomy that the frame runner reports to the
//! top-level caller.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// DType
// ─────────────────────────────────────────────────────────────────────────────

/// Element type of a [`Tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I64,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I64 => write!(f, "i64"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tensor
// ─────────────────────────────────────────────────────────────────────────────

/// Flat, row-major element storage of a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I64(Vec<i64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::I64(_) => DType::I64,
        }
    }
}

/// A dense n-dimensional buffer: shape plus row-major elements.
///
/// The invariant `shape.iter().product() == data.len()` is enforced by every
/// constructor, so downstream code can trust the shape when it names files or
/// slices rows.
///
/// # Example
///
/// ```rust
/// use streammem_types::Tensor;
///
/// let t = Tensor::from_f32(vec![1, 2, 3], vec![0.0; 6]).unwrap();
/// assert_eq!(t.shape_label(), "1x2x3");
/// assert_eq!(t.to_le_bytes().len(), 24);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking that `shape` covers exactly `data.len()`
    /// elements.
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, StreamError> {
        let Some(expected) = element_count(&shape) else {
            return Err(StreamError::Shape(format!(
                "shape {} overflows the element count",
                shape_label(&shape)
            )));
        };
        if expected != data.len() {
            return Err(StreamError::Shape(format!(
                "shape {} needs {expected} elements, got {}",
                shape_label(&shape),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, StreamError> {
        Self::new(shape, TensorData::F32(data))
    }

    /// A zero-filled `f32` tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            data: TensorData::F32(vec![0.0; n]),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the elements as `f32`, or `None` for other dtypes.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Dimensions joined by `x`, e.g. `6x1x428x10`.
    pub fn shape_label(&self) -> String {
        shape_label(&self.shape)
    }

    /// Raw little-endian element bytes in row-major order, no header.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Inverse of [`Tensor::to_le_bytes`].
    pub fn from_le_bytes(shape: Vec<usize>, dtype: DType, bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() % dtype.size_of() != 0 {
            return Err(StreamError::Shape(format!(
                "{} bytes is not a whole number of {dtype} elements",
                bytes.len()
            )));
        }
        let data = match dtype {
            DType::F32 => TensorData::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DType::F64 => TensorData::F64(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            DType::I64 => TensorData::I64(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        };
        Self::new(shape, data)
    }
}

/// Number of elements a shape covers, or `None` if the product overflows.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

/// Join dimensions with `x`; the empty shape (a scalar) is labelled `1`.
pub fn shape_label(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "1".to_string();
    }
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type for a verification run.
///
/// Every variant carries enough context (frame index, field or artifact name)
/// to locate the failure without re-running.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Rejected before any frame runs.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// The inference unit broke its output contract.
    #[error("Contract Violation at frame {frame} on `{field}`: {detail}")]
    ContractViolation {
        frame: usize,
        field: String,
        detail: String,
    },

    #[error("I/O Error at frame {frame} writing `{artifact}` ({}): {source}", path.display())]
    Io {
        frame: usize,
        artifact: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shape Error: {0}")]
    Shape(String),

    #[error("Frame Source Error: {0}")]
    Source(String),

    /// The run was interrupted between frames.
    #[error("Run cancelled after {completed} completed frame(s)")]
    Cancelled { completed: usize },
}

impl StreamError {
    pub fn contract(frame: usize, field: impl Into<String>, detail: impl Into<String>) -> Self {
        StreamError::ContractViolation {
            frame,
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// `true` for errors detected before any frame runs.
    pub fn is_config(&self) -> bool {
        matches!(self, StreamError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_shape() {
        let err = Tensor::from_f32(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, StreamError::Shape(_)));
        assert!(err.to_string().contains("2x3"));
    }

    #[test]
    fn overflowing_shape_is_a_shape_error() {
        assert_eq!(element_count(&[usize::MAX, 2]), None);
        assert_eq!(element_count(&[2, 3, 4]), Some(24));
        assert_eq!(element_count(&[]), Some(1));

        let err = Tensor::from_le_bytes(vec![usize::MAX, 2], DType::F32, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, StreamError::Shape(_)));
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn shape_label_joins_with_x() {
        let t = Tensor::zeros(vec![6, 1, 428, 10]);
        assert_eq!(t.shape_label(), "6x1x428x10");
        assert_eq!(shape_label(&[]), "1");
    }

    #[test]
    fn le_bytes_are_row_major_without_header() {
        let t = Tensor::from_f32(vec![2], vec![1.0, -2.5]).unwrap();
        let bytes = t.to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn from_le_bytes_restores_values() {
        let t = Tensor::new(vec![1, 2], TensorData::I64(vec![7, -9])).unwrap();
        let back = Tensor::from_le_bytes(vec![1, 2], DType::I64, &t.to_le_bytes()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn from_le_bytes_rejects_ragged_buffer() {
        let err = Tensor::from_le_bytes(vec![1], DType::F32, &[0u8; 3]).unwrap_err();
        assert!(matches!(err, StreamError::Shape(_)));
    }

    #[test]
    fn dtype_serializes_lowercase() {
        let json = serde_json::to_string(&DType::F64).unwrap();
        assert_eq!(json, "\"f64\"");
    }

    #[test]
    fn stream_error_display_carries_context() {
        let err = StreamError::contract(3, "post_mem_embedding", "expected 640 rows, got 512");
        let msg = err.to_string();
        assert!(msg.contains("frame 3"));
        assert!(msg.contains("post_mem_embedding"));
        assert!(!err.is_config());
        assert!(StreamError::Config("x".into()).is_config());
    }
}
