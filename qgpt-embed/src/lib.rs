use sha2::{Digest, Sha256};

/// Dimensionality used by the offline embedding backend.
pub const DEFAULT_DIM: usize = 256;

/// Deterministic lexical embedding: each lowercased word is hashed into a
/// signed bucket, then the vector is L2-normalized.
///
/// Texts sharing words land close together under cosine similarity, which is
/// enough to rank curated examples without a model.
pub fn embed(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    if dim == 0 {
        return v;
    }
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
    {
        let token = token.to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let idx = u16::from_le_bytes([digest[0], digest[1]]) as usize % dim;
        let sign = if digest[2] % 2 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

pub fn embed_all<S: AsRef<str>>(texts: &[S], dim: usize) -> Vec<Vec<f32>> {
    texts.iter().map(|t| embed(t.as_ref(), dim)).collect()
}
