//! Lockfile: binds inputs → pipeline → outputs (§3). Content-addressed; may be kept as
//! timestamped snapshots under `state/locks/<packet>/<ts>.json` for time-travel (§4.9).

use crate::error::CpmError;
use crate::trust::TrustReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    pub chunker_config_hash: String,
    pub embed_model: String,
    pub retrieval_caps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVerification {
    pub signature: bool,
    pub sbom: bool,
    pub provenance: bool,
    pub trust_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLock {
    pub uri: String,
    pub digest: String,
    pub verification: SourceVerification,
    pub resolved_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub schema_version: u32,
    pub inputs: BTreeMap<String, String>,
    pub pipeline: PipelineParams,
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
}

impl Lockfile {
    /// Invariant (e): a lockfile is valid iff every `outputs.<f>.sha256` equals the current
    /// SHA-256 of `<f>`, resolved relative to `packet_dir`.
    pub fn verify_outputs(&self, packet_dir: &Path) -> Result<(), CpmError> {
        for (artifact, expected_sha) in &self.outputs {
            let path = packet_dir.join(artifact);
            let actual_sha = crate::hashing::sha256_file(&path)
                .map_err(|e| CpmError::LockMismatch { artifact: format!("{artifact} (io error: {e})") })?;
            if &actual_sha != expected_sha {
                return Err(CpmError::LockMismatch { artifact: artifact.clone() });
            }
        }
        Ok(())
    }

    /// Recomputes every `outputs.<f>` sha256 from the files currently on disk under
    /// `packet_dir`. Used by `--update-lock` (§7): a `LockMismatch` outside
    /// `--frozen-lockfile` warns and may rewrite the lock this way rather than aborting.
    pub fn rewrite_outputs(&mut self, packet_dir: &Path) -> std::io::Result<()> {
        for (artifact, sha) in self.outputs.iter_mut() {
            let path = packet_dir.join(artifact.as_str());
            *sha = crate::hashing::sha256_file(&path)?;
        }
        Ok(())
    }
}

pub fn source_lock_from_trust(uri: &str, digest: &str, trust: &TrustReport, resolved_at: &str) -> SourceLock {
    SourceLock {
        uri: uri.to_string(),
        digest: digest.to_string(),
        verification: SourceVerification {
            signature: trust.signature.present && trust.signature.valid,
            sbom: trust.sbom.present && trust.sbom.valid,
            provenance: trust.provenance.present && trust.provenance.valid,
            trust_score: trust.score,
        },
        resolved_at: resolved_at.to_string(),
    }
}

/// Writes a timestamped lock snapshot to `state/locks/<packet>/<timestamp>.json` for later
/// time-travel resolution (§4.9). `timestamp` is caller-supplied (RFC 3339) so tests and replay
/// stay deterministic without touching the system clock from inside this function.
pub fn write_snapshot(locks_dir: &Path, timestamp: &str, lock: &Lockfile) -> anyhow::Result<()> {
    std::fs::create_dir_all(locks_dir)?;
    let path = locks_dir.join(format!("{timestamp}.json"));
    let text = serde_json::to_string_pretty(lock)?;
    crate::build::atomic::write_atomic(&path, text.as_bytes())
}

/// Resolves `query --as-of <timestamp>`: the largest snapshot timestamp `<= timestamp`.
pub fn resolve_as_of(locks_dir: &Path, as_of: &str) -> anyhow::Result<Option<(String, Lockfile)>> {
    if !locks_dir.exists() {
        return Ok(None);
    }
    let mut candidates: Vec<String> = std::fs::read_dir(locks_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
        .filter(|ts| ts.as_str() <= as_of)
        .collect();
    candidates.sort();

    let Some(best) = candidates.pop() else { return Ok(None) };
    let path = locks_dir.join(format!("{best}.json"));
    let text = std::fs::read_to_string(&path)?;
    let lock: Lockfile = serde_json::from_str(&text)?;
    Ok(Some((best, lock)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lock() -> Lockfile {
        Lockfile {
            schema_version: 1,
            inputs: BTreeMap::new(),
            pipeline: PipelineParams { chunker_config_hash: "abc".into(), embed_model: "m".into(), retrieval_caps: vec!["dense".into()] },
            outputs: BTreeMap::new(),
            source: None,
            parent_snapshot: None,
        }
    }

    #[test]
    fn verify_outputs_passes_when_hashes_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docs.jsonl"), b"line\n").unwrap();
        let mut lock = sample_lock();
        lock.outputs.insert("docs.jsonl".to_string(), crate::hashing::sha256_file(&dir.path().join("docs.jsonl")).unwrap());
        assert!(lock.verify_outputs(dir.path()).is_ok());
    }

    #[test]
    fn verify_outputs_fails_when_file_changed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docs.jsonl"), b"line\n").unwrap();
        let mut lock = sample_lock();
        lock.outputs.insert("docs.jsonl".to_string(), crate::hashing::sha256_file(&dir.path().join("docs.jsonl")).unwrap());
        std::fs::write(dir.path().join("docs.jsonl"), b"different\n").unwrap();
        let err = lock.verify_outputs(dir.path()).unwrap_err();
        assert!(matches!(err, CpmError::LockMismatch { .. }));
    }

    #[test]
    fn rewrite_outputs_resyncs_a_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docs.jsonl"), b"line\n").unwrap();
        let mut lock = sample_lock();
        lock.outputs.insert("docs.jsonl".to_string(), crate::hashing::sha256_file(&dir.path().join("docs.jsonl")).unwrap());
        std::fs::write(dir.path().join("docs.jsonl"), b"different\n").unwrap();
        assert!(lock.verify_outputs(dir.path()).is_err());
        lock.rewrite_outputs(dir.path()).unwrap();
        assert!(lock.verify_outputs(dir.path()).is_ok());
    }

    #[test]
    fn resolve_as_of_picks_largest_snapshot_leq_target() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "2026-01-01T00:00:00Z", &sample_lock()).unwrap();
        write_snapshot(dir.path(), "2026-02-01T00:00:00Z", &sample_lock()).unwrap();

        let (ts, _) = resolve_as_of(dir.path(), "2026-01-15T00:00:00Z").unwrap().expect("should resolve");
        assert_eq!(ts, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn resolve_as_of_returns_none_when_no_snapshot_is_old_enough() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "2026-02-01T00:00:00Z", &sample_lock()).unwrap();
        assert!(resolve_as_of(dir.path(), "2025-01-01T00:00:00Z").unwrap().is_none());
    }
}
