//! Replay logs (§4.9): every query writes `state/replay/query-<ts>.json` recording enough to
//! deterministically reproduce its result set and compiled output later, for audit and
//! regression comparison.

use crate::error::CpmError;
use crate::hashing::sha256_hex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayLog {
    pub query_text: String,
    pub mode: String,
    pub k: usize,
    pub as_of: Option<String>,
    #[serde(default)]
    pub packet_digest: Option<String>,
    /// The URI the packet was resolved from, so `replay` can re-fetch it from the same `Source`
    /// instead of trusting a caller-supplied directory. `None` for logs predating this field;
    /// `replay` falls back to its own `--packet-dir` in that case.
    #[serde(default)]
    pub source_uri: Option<String>,
    /// Declared embedding model at query time (`manifest.embedding.model`), for diagnostics.
    #[serde(default)]
    pub model: Option<String>,
    /// The token budget actually used to compile the result (`--token-budget` or policy default).
    #[serde(default)]
    pub token_budget: Option<usize>,
    #[serde(default)]
    pub reranker: Option<String>,
    pub result_chunk_ids: Vec<String>,
    pub result_hash: String,
    pub compiler_output_hash: Option<String>,
    #[serde(default)]
    pub policy_decision: String,
    pub timestamp: String,
}

/// `result_hash`: sha256 over the ordered, newline-joined result chunk ids. Reproducible iff the
/// same packet snapshot and ranking produce the same ordered id list.
pub fn compute_result_hash(chunk_ids: &[String]) -> String {
    sha256_hex(chunk_ids.join("\n").as_bytes())
}

pub fn compute_compiler_output_hash(compiled_text: &str) -> String {
    sha256_hex(compiled_text.as_bytes())
}

pub fn write_replay_log(replay_dir: &Path, log: &ReplayLog) -> anyhow::Result<()> {
    let path = replay_dir.join(format!("query-{}.json", log.timestamp));
    let text = serde_json::to_string_pretty(log)?;
    crate::build::atomic::write_atomic(&path, text.as_bytes())
}

pub fn read_replay_log(path: &Path) -> anyhow::Result<ReplayLog> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Verifies a freshly re-run query against a stored log's recorded hashes (§4.9 "replay succeeds
/// iff `result_hash` and `compiler_output_hash` reproduce exactly"). `fresh_compiler_output_hash`
/// is `None` only when the log itself never recorded one (a `Failed` query has no compiled
/// output), in which case the compiler-output check is skipped.
pub fn verify_replay(log: &ReplayLog, fresh_chunk_ids: &[String], fresh_compiler_output_hash: Option<&str>) -> Result<(), CpmError> {
    let fresh_hash = compute_result_hash(fresh_chunk_ids);
    if fresh_hash != log.result_hash {
        return Err(CpmError::ReplayMismatch { expected: log.result_hash.clone(), actual: fresh_hash });
    }

    if let Some(expected) = &log.compiler_output_hash {
        let actual = fresh_compiler_output_hash.unwrap_or("");
        if actual != expected {
            return Err(CpmError::ReplayMismatch { expected: expected.clone(), actual: actual.to_string() });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> ReplayLog {
        ReplayLog {
            query_text: "how does auth work".to_string(),
            mode: "hybrid".to_string(),
            k: 5,
            as_of: None,
            packet_digest: None,
            source_uri: None,
            model: Some("test-embedder".to_string()),
            token_budget: Some(4000),
            reranker: Some("noop".to_string()),
            result_chunk_ids: vec!["a:0".to_string(), "b:1".to_string()],
            result_hash: compute_result_hash(&["a:0".to_string(), "b:1".to_string()]),
            compiler_output_hash: Some(compute_compiler_output_hash("rendered context")),
            policy_decision: "Allow".to_string(),
            timestamp: "2026-01-01T00-00-00Z".to_string(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = sample_log();
        write_replay_log(dir.path(), &log).unwrap();
        let path = dir.path().join(format!("query-{}.json", log.timestamp));
        let back = read_replay_log(&path).unwrap();
        assert_eq!(back.result_hash, log.result_hash);
    }

    #[test]
    fn verify_replay_passes_for_identical_result_order_and_output() {
        let log = sample_log();
        let hash = compute_compiler_output_hash("rendered context");
        assert!(verify_replay(&log, &log.result_chunk_ids, Some(hash.as_str())).is_ok());
    }

    #[test]
    fn verify_replay_fails_when_result_order_changes() {
        let log = sample_log();
        let reordered = vec!["b:1".to_string(), "a:0".to_string()];
        let err = verify_replay(&log, &reordered, log.compiler_output_hash.as_deref()).unwrap_err();
        assert!(matches!(err, CpmError::ReplayMismatch { .. }));
    }

    #[test]
    fn verify_replay_fails_when_compiler_output_hash_changes() {
        let log = sample_log();
        let err = verify_replay(&log, &log.result_chunk_ids, Some("different rendered context")).unwrap_err();
        assert!(matches!(err, CpmError::ReplayMismatch { .. }));
    }

    #[test]
    fn verify_replay_skips_output_check_when_log_has_no_recorded_hash() {
        let mut log = sample_log();
        log.compiler_output_hash = None;
        assert!(verify_replay(&log, &log.result_chunk_ids, None).is_ok());
    }
}
