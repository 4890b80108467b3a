/// Cosine similarity, clamped to [-1, 1].
///
/// Zero when either vector is empty, the lengths differ, or either has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let s = dot / (norm_a * norm_b);
    if s.is_nan() {
        0.0
    } else {
        s.clamp(-1.0, 1.0)
    }
}

struct Entry<M> {
    id: String,
    vector: Vec<f32>,
    metadata: M,
}

#[derive(Debug, PartialEq)]
pub struct Hit<'a, M> {
    pub id: &'a str,
    pub score: f32,
    pub metadata: &'a M,
}

/// Append-only, brute-force nearest-neighbour index.
///
/// Meant for the handful of curated examples of a workspace: every query is a
/// linear scan. One index per pipeline run, so nothing leaks between questions.
pub struct VectorIndex<M> {
    entries: Vec<Entry<M>>,
}

impl<M> VectorIndex<M> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, id: impl Into<String>, vector: Vec<f32>, metadata: M) {
        self.entries.push(Entry {
            id: id.into(),
            vector,
            metadata,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `top_k` entries most similar to `vector`, best first. Ties keep
    /// insertion order.
    pub fn query(&self, vector: &[f32], top_k: usize) -> Vec<Hit<'_, M>> {
        let mut hits: Vec<Hit<'_, M>> = self
            .entries
            .iter()
            .map(|e| Hit {
                id: e.id.as_str(),
                score: cosine_similarity(vector, &e.vector),
                metadata: &e.metadata,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        hits
    }
}

impl<M> Default for VectorIndex<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_cosine_similarity() {
        let mut index = VectorIndex::new();
        index.add("a", vec![1.0, 0.0, 0.0], "a");
        index.add("b", vec![0.0, 1.0, 0.0], "b");
        index.add("c", vec![1.0, 1.0, 0.0], "c");

        let hits = index.query(&[0.9, 0.1, 0.0], 2);
        let ids: Vec<&str> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(*hits[1].metadata, "c");
    }

    #[test]
    fn degenerate_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let pairs: [(&[f32], &[f32]); 3] = [
            (&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]),
            (&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]),
            (&[1e-20, 3e-20], &[2e-20, 1e-20]),
        ];
        for (a, b) in pairs {
            let s = cosine_similarity(a, b);
            assert!((-1.0..=1.0).contains(&s), "{s} out of range");
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut index = VectorIndex::new();
        index.add("first", vec![1.0, 0.0], ());
        index.add("second", vec![2.0, 0.0], ());
        index.add("mismatched", vec![1.0], ());
        let ids: Vec<&str> = index.query(&[1.0, 0.0], 5).iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["first", "second", "mismatched"]);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index: VectorIndex<()> = VectorIndex::new();
        assert!(index.query(&[1.0], 3).is_empty());
    }
}
