use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding length mismatch: {0} vs {1}")]
    DimensionMismatch(usize, usize),
    #[error("zero-norm embedding")]
    ZeroNorm,
    #[error("non-finite similarity")]
    NonFinite,
}

/// Cosine similarity between two embeddings.
///
/// Inputs are expected to be unit-normalized already, but the norms are
/// applied anyway so un-normalized vectors still compare correctly.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch(a.len(), b.len()));
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return Err(SimilarityError::ZeroNorm);
    }

    let similarity = dot / denom;
    if !similarity.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    Ok(similarity)
}

/// Round to 4 decimal places for reporting.
pub fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}
