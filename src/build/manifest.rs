//! `PacketManifest`: immutable metadata written once per build (§3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMeta {
    pub model: String,
    pub dim: usize,
    pub dtype: String,
    pub normalized: bool,
    pub max_seq_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketCounts {
    pub docs: usize,
    pub vectors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalCounts {
    pub reused: usize,
    pub embedded: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub algo: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketManifest {
    pub schema_version: u32,
    pub packet_id: String,
    pub version: String,
    pub created_at: String,
    pub embedding: EmbeddingMeta,
    pub counts: PacketCounts,
    pub incremental: IncrementalCounts,
    pub checksums: BTreeMap<String, ChecksumEntry>,
}

impl PacketManifest {
    /// Invariant (a): every chunk has exactly one vector row.
    pub fn counts_consistent(&self) -> bool {
        self.counts.vectors == self.counts.docs
    }

    /// Invariant (f): vectors are consistent with the manifest iff dim/model match the cache key
    /// used during build. Callers pass in the config actually used for the current build.
    pub fn embedding_matches(&self, model: &str, dim: usize) -> bool {
        self.embedding.model == model && self.embedding.dim == dim
    }
}

/// Renders the manifest's "human-readable twin", `cpm.yml` (§4.2 step 9).
pub fn render_cpm_yml(manifest: &PacketManifest) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PacketManifest {
        PacketManifest {
            schema_version: 1,
            packet_id: "docs".to_string(),
            version: "1.0.0".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            embedding: EmbeddingMeta { model: "m".to_string(), dim: 4, dtype: "float16".to_string(), normalized: true, max_seq_length: 512 },
            counts: PacketCounts { docs: 2, vectors: 2 },
            incremental: IncrementalCounts { reused: 2, embedded: 0, removed: 0 },
            checksums: Default::default(),
        }
    }

    #[test]
    fn counts_consistent_detects_mismatch() {
        let mut m = sample();
        assert!(m.counts_consistent());
        m.counts.vectors = 1;
        assert!(!m.counts_consistent());
    }

    #[test]
    fn embedding_matches_checks_both_model_and_dim() {
        let m = sample();
        assert!(m.embedding_matches("m", 4));
        assert!(!m.embedding_matches("m", 8));
        assert!(!m.embedding_matches("other", 4));
    }

    #[test]
    fn cpm_yml_round_trips() {
        let m = sample();
        let yaml = render_cpm_yml(&m).unwrap();
        let back: PacketManifest = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.packet_id, m.packet_id);
    }
}
