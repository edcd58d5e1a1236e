//! Dense retriever: a flat inner-product index (`FlatIP`, §4.6). Vectors are assumed
//! pre-normalized by the embedder (`EmbeddingConfig::normalized`), so inner product ranks the
//! same as cosine similarity without a second pass.

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

pub struct FlatIpIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIpIndex {
    pub fn build(ids: Vec<String>, vectors: Vec<Vec<f32>>) -> Self {
        debug_assert_eq!(ids.len(), vectors.len());
        Self { ids, vectors }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Top-k by inner product, ties broken by descending score then ascending chunk id (§9).
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, vec)| ScoredChunk { chunk_id: id.clone(), score: dot(query, vec) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        scored.truncate(k);
        scored
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_inner_product_descending() {
        let index = FlatIpIndex::build(
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
        );
        let results = index.search(&[1.0, 0.0], 2);
        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn ties_break_by_ascending_chunk_id() {
        let index = FlatIpIndex::build(vec!["z".into(), "a".into()], vec![vec![1.0], vec![1.0]]);
        let results = index.search(&[1.0], 2);
        assert_eq!(results[0].chunk_id, "a");
    }

    #[test]
    fn k_larger_than_corpus_returns_whole_corpus() {
        let index = FlatIpIndex::build(vec!["a".into()], vec![vec![1.0]]);
        assert_eq!(index.search(&[1.0], 50).len(), 1);
    }
}
