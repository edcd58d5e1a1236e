//! Workspace-level embedding cache (§4.3): a second content-addressed cache, keyed by
//! `hashing::embed_cache_key(model, text)` rather than raw bytes, storing the f16-packed vector
//! for each unique `(model, normalized text)` pair so unchanged chunks never get re-embedded.

use crate::retrieve::vectors;
use crate::source::cas::SourceCache;
use anyhow::{Context, Result};

pub struct EmbedCache {
    store: SourceCache,
    dim: usize,
}

impl EmbedCache {
    pub fn new(root: impl Into<std::path::PathBuf>, byte_quota: u64, dim: usize) -> Self {
        Self { store: SourceCache::new(root, byte_quota), dim }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let bytes = self.store.get(key)?;
        vectors::decode(&bytes, self.dim).ok().and_then(|mut rows| rows.pop())
    }

    pub fn put(&self, key: &str, vector: &[f32]) -> Result<()> {
        let bytes = vectors::encode(std::slice::from_ref(&vector.to_vec()));
        self.store.put(key, &bytes).context("writing embedding cache entry")?;
        Ok(())
    }

    pub fn evict_to_quota(&self) -> Result<Vec<String>> {
        self.store.evict_to_quota()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_a_vector() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbedCache::new(dir.path(), u64::MAX, 3);
        let key = crate::hashing::embed_cache_key("model-a", "some chunk text");
        cache.put(&key, &[0.1, 0.2, 0.3]).unwrap();
        let got = cache.get(&key).unwrap();
        for (a, b) in got.iter().zip([0.1f32, 0.2, 0.3].iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbedCache::new(dir.path(), u64::MAX, 3);
        assert!(cache.get("nonexistent-key").is_none());
    }
}
