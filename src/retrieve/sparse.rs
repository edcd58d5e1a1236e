//! Sparse retriever: Okapi BM25 (`k1=1.2`, `b=0.75`, §4.6) over the shared tokenizer so term
//! boundaries agree with dense chunking and compiler budget accounting.

use super::dense::ScoredChunk;
use crate::tokenizer::tokenize;
use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

pub struct Bm25Index {
    doc_ids: Vec<String>,
    doc_term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<f32>,
    avg_doc_length: f32,
    doc_freq: HashMap<String, u32>,
}

impl Bm25Index {
    pub fn build(docs: &[(String, String)]) -> Self {
        let mut doc_ids = Vec::with_capacity(docs.len());
        let mut doc_term_freqs = Vec::with_capacity(docs.len());
        let mut doc_lengths = Vec::with_capacity(docs.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for (id, text) in docs {
            let terms = tokenize(text);
            doc_lengths.push(terms.len() as f32);
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for term in &terms {
                *freqs.entry(term.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_ids.push(id.clone());
            doc_term_freqs.push(freqs);
        }

        let avg_doc_length = if doc_lengths.is_empty() { 0.0 } else { doc_lengths.iter().sum::<f32>() / doc_lengths.len() as f32 };

        Self { doc_ids, doc_term_freqs, doc_lengths, avg_doc_length, doc_freq }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_ids.len() as f32;
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        let query_terms = tokenize(query);
        let mut scored: Vec<ScoredChunk> = self
            .doc_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let len = self.doc_lengths[i];
                let score: f32 = query_terms
                    .iter()
                    .map(|term| {
                        let tf = *self.doc_term_freqs[i].get(term).unwrap_or(&0) as f32;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = self.idf(term);
                        let denom = tf + K1 * (1.0 - B + B * len / self.avg_doc_length.max(1.0));
                        idf * (tf * (K1 + 1.0)) / denom
                    })
                    .sum();
                ScoredChunk { chunk_id: id.clone(), score }
            })
            .filter(|sc| sc.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_present_in_fewer_docs_scores_higher() {
        let docs = vec![
            ("a".to_string(), "the quick brown fox".to_string()),
            ("b".to_string(), "the quick brown fox jumps".to_string()),
            ("c".to_string(), "zebra stampede across the plains".to_string()),
        ];
        let index = Bm25Index::build(&docs);
        let results = index.search("zebra", 3);
        assert_eq!(results[0].chunk_id, "c");
    }

    #[test]
    fn query_with_no_matching_terms_returns_empty() {
        let docs = vec![("a".to_string(), "alpha beta".to_string())];
        let index = Bm25Index::build(&docs);
        assert!(index.search("gamma delta", 5).is_empty());
    }

    #[test]
    fn empty_corpus_does_not_panic() {
        let index = Bm25Index::build(&[]);
        assert!(index.search("anything", 5).is_empty());
    }
}
