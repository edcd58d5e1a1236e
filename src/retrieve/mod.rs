//! Retrieval (§4.6): dense (`FlatIP`), sparse (`BM25`), and hybrid (`RRF`) query over a built
//! packet. Falls back to dense-only with a warning when the requested mode's artifacts are
//! missing from the packet (e.g. `bm25.bin` absent because `hybrid_retrieval` was off at build
//! time).

pub mod dense;
pub mod hybrid;
pub mod sparse;
pub mod vectors;

pub use dense::{FlatIpIndex, ScoredChunk};
pub use sparse::Bm25Index;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Dense,
    Sparse,
    Hybrid,
}

pub struct Retriever {
    dense: FlatIpIndex,
    sparse: Option<Bm25Index>,
}

impl Retriever {
    pub fn new(dense: FlatIpIndex, sparse: Option<Bm25Index>) -> Self {
        Self { dense, sparse }
    }

    /// Resolves the effective mode: `Hybrid`/`Sparse` without a sparse index degrade to `Dense`
    /// with a `debug_log!` warning rather than erroring (the query pipeline still owes the user
    /// a result if one of the two indexes built successfully).
    pub fn search(&self, mode: RetrievalMode, query_text: &str, query_vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        let pool = hybrid::candidate_pool_size(k);
        match mode {
            RetrievalMode::Dense => self.dense.search(query_vector, k),
            RetrievalMode::Sparse => match &self.sparse {
                Some(bm25) => bm25.search(query_text, k),
                None => {
                    crate::debug_log!("sparse index unavailable; falling back to dense");
                    self.dense.search(query_vector, k)
                }
            },
            RetrievalMode::Hybrid => match &self.sparse {
                Some(bm25) => {
                    let dense_hits = self.dense.search(query_vector, pool);
                    let sparse_hits = bm25.search(query_text, pool);
                    hybrid::fuse(&dense_hits, &sparse_hits, k)
                }
                None => {
                    crate::debug_log!("hybrid requested but bm25 index missing; falling back to dense");
                    self.dense.search(query_vector, k)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_retriever() -> Retriever {
        let dense = FlatIpIndex::build(vec!["a".into(), "b".into()], vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let sparse = Bm25Index::build(&[("a".to_string(), "alpha one".to_string()), ("b".to_string(), "beta two".to_string())]);
        Retriever::new(dense, Some(sparse))
    }

    #[test]
    fn hybrid_falls_back_to_dense_without_sparse_index() {
        let dense = FlatIpIndex::build(vec!["a".into()], vec![vec![1.0]]);
        let retriever = Retriever::new(dense, None);
        let results = retriever.search(RetrievalMode::Hybrid, "anything", &[1.0], 1);
        assert_eq!(results[0].chunk_id, "a");
    }

    #[test]
    fn hybrid_combines_both_signals() {
        let retriever = sample_retriever();
        let results = retriever.search(RetrievalMode::Hybrid, "alpha", &[1.0, 0.0], 2);
        assert!(!results.is_empty());
    }

    #[test]
    fn dense_mode_ignores_query_text() {
        let retriever = sample_retriever();
        let results = retriever.search(RetrievalMode::Dense, "irrelevant text", &[0.0, 1.0], 1);
        assert_eq!(results[0].chunk_id, "b");
    }
}
