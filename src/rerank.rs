//! Rerankers (§4.7): reorder a retrieved candidate set before it reaches the context compiler.

use crate::tokenizer::tokenize;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

pub trait Reranker {
    fn name(&self) -> &'static str;
    fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>, k: usize) -> Vec<RerankCandidate>;
}

pub struct NoopReranker;

impl Reranker for NoopReranker {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn rerank(&self, _query: &str, mut candidates: Vec<RerankCandidate>, k: usize) -> Vec<RerankCandidate> {
        candidates.truncate(k);
        candidates
    }
}

/// Maximal-marginal-relevance reranker with `lambda = 0.5`: at each step picks the candidate
/// maximizing `lambda * relevance - (1 - lambda) * max_similarity_to_already_selected`, where
/// similarity is Jaccard overlap over the shared tokenizer's token sets (a cheap proxy for
/// embedding cosine that needs no extra model call at rerank time).
pub struct TokenDiversityReranker {
    pub lambda: f32,
}

impl Default for TokenDiversityReranker {
    fn default() -> Self {
        Self { lambda: 0.5 }
    }
}

fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

impl Reranker for TokenDiversityReranker {
    fn name(&self) -> &'static str {
        "token_diversity_mmr"
    }

    fn rerank(&self, _query: &str, candidates: Vec<RerankCandidate>, k: usize) -> Vec<RerankCandidate> {
        if candidates.is_empty() {
            return candidates;
        }
        let max_score = candidates.iter().map(|c| c.score).fold(f32::MIN, f32::max).max(f32::EPSILON);
        let token_sets: Vec<HashSet<String>> = candidates.iter().map(|c| token_set(&c.text)).collect();

        let mut remaining: Vec<usize> = (0..candidates.len()).collect();
        let mut selected: Vec<usize> = Vec::new();

        while !remaining.is_empty() && selected.len() < k {
            let mut best_idx = 0usize;
            let mut best_score = f32::MIN;
            for (pos, &idx) in remaining.iter().enumerate() {
                let relevance = candidates[idx].score / max_score;
                let max_sim = selected.iter().map(|&s| jaccard(&token_sets[idx], &token_sets[s])).fold(0.0f32, f32::max);
                let mmr = self.lambda * relevance - (1.0 - self.lambda) * max_sim;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = pos;
                }
            }
            selected.push(remaining.remove(best_idx));
        }

        selected.into_iter().map(|idx| candidates[idx].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, text: &str, score: f32) -> RerankCandidate {
        RerankCandidate { chunk_id: id.to_string(), text: text.to_string(), score }
    }

    #[test]
    fn noop_just_truncates_to_k() {
        let candidates = vec![cand("a", "x", 1.0), cand("b", "y", 0.9), cand("c", "z", 0.8)];
        let result = NoopReranker.rerank("q", candidates, 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].chunk_id, "a");
    }

    #[test]
    fn mmr_prefers_the_highest_scoring_candidate_first() {
        let candidates = vec![cand("a", "alpha beta gamma", 1.0), cand("b", "alpha beta gamma", 0.9), cand("c", "zeta eta theta", 0.5)];
        let reranker = TokenDiversityReranker::default();
        let result = reranker.rerank("q", candidates, 3);
        assert_eq!(result[0].chunk_id, "a");
    }

    #[test]
    fn mmr_demotes_near_duplicate_over_a_diverse_lower_scorer() {
        let candidates = vec![cand("a", "alpha beta gamma delta", 1.0), cand("b", "alpha beta gamma delta", 0.95), cand("c", "completely different words here", 0.7)];
        let reranker = TokenDiversityReranker::default();
        let result = reranker.rerank("q", candidates, 2);
        let ids: Vec<_> = result.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids[0], "a");
        assert_eq!(ids[1], "c");
    }

    #[test]
    fn empty_input_returns_empty() {
        let reranker = TokenDiversityReranker::default();
        assert!(reranker.rerank("q", Vec::new(), 5).is_empty());
    }
}
