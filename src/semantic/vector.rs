//! Vector math and packed storage encoding.
//!
//! Vectors are worked with as `f64` and persisted as packed little-endian
//! `f32`, so a stored vector round-trips to 32-bit precision only.

/// Errors from comparing or decoding vectors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Cannot compare empty vectors")]
    EmptyVector,

    #[error("Packed vector length {0} is not a multiple of 4 bytes")]
    InvalidByteLength(usize),
}

/// Compute L2 norm of a vector.
///
/// Components are scaled by the largest magnitude first so that squaring
/// neither overflows nor underflows.
pub fn l2_norm(v: &[f64]) -> f64 {
    let scale = max_abs(v);
    if scale == 0.0 || !scale.is_finite() {
        return scale;
    }
    scale * v.iter().map(|x| (x / scale).powi(2)).sum::<f64>().sqrt()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |max: f64, x| max.max(x.abs()))
}

/// Cosine similarity floored into `[0, 1]`.
///
/// Both vectors must have the same, non-zero length. A zero-magnitude vector
/// scores 0 rather than dividing by zero. Negative cosine is floored to 0:
/// opposite direction counts as "not similar" for deduplication.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    if a.is_empty() {
        return Err(VectorError::EmptyVector);
    }

    let scale_a = max_abs(a);
    let scale_b = max_abs(b);
    if scale_a == 0.0 || scale_b == 0.0 {
        return Ok(0.0);
    }

    // Cosine is scale invariant; work on vectors with components in [-1, 1]
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        let x = x / scale_a;
        let y = y / scale_b;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    // Both sums are in [1, len], so the product cannot overflow
    let similarity = dot / (norm_a * norm_b).sqrt();
    if !similarity.is_finite() {
        return Ok(0.0);
    }
    Ok(similarity.clamp(0.0, 1.0))
}

/// Pack a vector as little-endian `f32`s.
pub fn serialize_vector(v: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for &value in v {
        bytes.extend_from_slice(&(value as f32).to_le_bytes());
    }
    bytes
}

/// Unpack a vector written by [`serialize_vector`].
pub fn deserialize_vector(bytes: &[u8]) -> Result<Vec<f64>, VectorError> {
    if bytes.len() % 4 != 0 {
        return Err(VectorError::InvalidByteLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
        .collect())
}
