//! Hybrid retrieval: reciprocal rank fusion over the dense and sparse rankings (§4.6).
//! `k' = max(k*4, 50)` candidates are drawn from each side before fusing, `c = 60`, ties break
//! by descending dense score then ascending chunk id.

use super::dense::ScoredChunk;
use std::collections::HashMap;

const RRF_C: f32 = 60.0;

pub fn candidate_pool_size(k: usize) -> usize {
    (k * 4).max(50)
}

/// `dense`/`sparse` are each already sorted best-first; only rank position matters for RRF.
pub fn fuse(dense: &[ScoredChunk], sparse: &[ScoredChunk], k: usize) -> Vec<ScoredChunk> {
    let mut rrf_score: HashMap<&str, f32> = HashMap::new();
    let mut dense_score: HashMap<&str, f32> = HashMap::new();

    for (rank, sc) in dense.iter().enumerate() {
        *rrf_score.entry(sc.chunk_id.as_str()).or_insert(0.0) += 1.0 / (RRF_C + rank as f32 + 1.0);
        dense_score.insert(sc.chunk_id.as_str(), sc.score);
    }
    for (rank, sc) in sparse.iter().enumerate() {
        *rrf_score.entry(sc.chunk_id.as_str()).or_insert(0.0) += 1.0 / (RRF_C + rank as f32 + 1.0);
    }

    let mut fused: Vec<ScoredChunk> = rrf_score
        .into_iter()
        .map(|(id, score)| ScoredChunk { chunk_id: id.to_string(), score })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = dense_score.get(a.chunk_id.as_str()).copied().unwrap_or(f32::MIN);
                let db = dense_score.get(b.chunk_id.as_str()).copied().unwrap_or(f32::MIN);
                db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk { chunk_id: id.to_string(), score }
    }

    #[test]
    fn candidate_pool_floors_at_fifty() {
        assert_eq!(candidate_pool_size(5), 50);
        assert_eq!(candidate_pool_size(20), 80);
    }

    #[test]
    fn a_chunk_ranked_first_on_both_sides_wins() {
        let dense = vec![sc("a", 0.9), sc("b", 0.8)];
        let sparse = vec![sc("a", 10.0), sc("c", 5.0)];
        let fused = fuse(&dense, &sparse, 3);
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn chunk_present_in_only_one_side_still_appears() {
        let dense = vec![sc("a", 0.9)];
        let sparse = vec![sc("b", 10.0)];
        let fused = fuse(&dense, &sparse, 3);
        let ids: Vec<_> = fused.iter().map(|s| s.chunk_id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"b"));
    }
}
