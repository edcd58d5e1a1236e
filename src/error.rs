//! Closed error taxonomy for the supply-chain engine.
//!
//! Call sites that only need to propagate failure use `anyhow::Result` with `.context(...)`,
//! same as the rest of the crate. Call sites that need to branch on *kind* (policy decisions,
//! exit-code mapping in `main`) match on `CpmError` directly.

use thiserror::Error;

/// One aspect of trust verification that can fail independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustAspect {
    Signature,
    Sbom,
    Provenance,
    Score,
}

impl std::fmt::Display for TrustAspect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrustAspect::Signature => "signature",
            TrustAspect::Sbom => "sbom",
            TrustAspect::Provenance => "provenance",
            TrustAspect::Score => "score",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CpmError {
    #[error("usage error: {0}")]
    UsageError(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("chunking error for {path}: {reason}")]
    ChunkingError { path: String, reason: String },

    #[error("embedder error: {0}")]
    EmbedderError(String),

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("source resolve error for {uri}: {reason}")]
    SourceResolveError { uri: String, reason: String },

    #[error("fetch error for {uri}: {reason}")]
    FetchError { uri: String, reason: String },

    #[error("trust violation: {aspect}")]
    TrustViolation { aspect: TrustAspect },

    #[error("policy denied by rule '{rule}'")]
    PolicyDeny { rule: String },

    #[error("lock mismatch for artifact '{artifact}'")]
    LockMismatch { artifact: String },

    #[error("index error: {0}")]
    IndexError(String),

    #[error("query returned no results")]
    QueryEmpty,

    #[error("token budget exceeded: {used} > {limit}")]
    BudgetExceeded { used: usize, limit: usize },

    #[error("replay mismatch: expected {expected}, got {actual}")]
    ReplayMismatch { expected: String, actual: String },

    #[error("drift gate failed: score {drift:.4} exceeds max {max:.4}")]
    DriftGateFailed { drift: f64, max: f64 },
}

impl CpmError {
    /// Maps an error kind to the process exit code it must produce (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            CpmError::UsageError(_) => 2,
            CpmError::PolicyDeny { .. } => 3,
            CpmError::TrustViolation { .. } => 4,
            CpmError::LockMismatch { .. } => 5,
            CpmError::ReplayMismatch { .. } => 5,
            CpmError::DriftGateFailed { .. } => 6,
            _ => 10,
        }
    }

    /// Machine-readable kind name for JSON-mode error output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CpmError::UsageError(_) => "UsageError",
            CpmError::IoError(_) => "IoError",
            CpmError::ChunkingError { .. } => "ChunkingError",
            CpmError::EmbedderError(_) => "EmbedderError",
            CpmError::CacheError(_) => "CacheError",
            CpmError::SourceResolveError { .. } => "SourceResolveError",
            CpmError::FetchError { .. } => "FetchError",
            CpmError::TrustViolation { .. } => "TrustViolation",
            CpmError::PolicyDeny { .. } => "PolicyDeny",
            CpmError::LockMismatch { .. } => "LockMismatch",
            CpmError::IndexError(_) => "IndexError",
            CpmError::QueryEmpty => "QueryEmpty",
            CpmError::BudgetExceeded { .. } => "BudgetExceeded",
            CpmError::ReplayMismatch { .. } => "ReplayMismatch",
            CpmError::DriftGateFailed { .. } => "DriftGateFailed",
        }
    }
}

/// Finds a `CpmError` anywhere in an anyhow error chain, for exit-code mapping in `main`.
pub fn downcast_chain(err: &anyhow::Error) -> Option<&CpmError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CpmError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(CpmError::UsageError("x".into()).exit_code(), 2);
        assert_eq!(CpmError::PolicyDeny { rule: "r".into() }.exit_code(), 3);
        assert_eq!(CpmError::TrustViolation { aspect: TrustAspect::Signature }.exit_code(), 4);
        assert_eq!(CpmError::LockMismatch { artifact: "a".into() }.exit_code(), 5);
        assert_eq!(CpmError::IndexError("x".into()).exit_code(), 10);
    }

    #[test]
    fn downcast_finds_wrapped_error() {
        let base = CpmError::QueryEmpty;
        let wrapped = anyhow::Error::new(base).context("while running query");
        let found = downcast_chain(&wrapped).expect("should find CpmError in chain");
        assert!(matches!(found, CpmError::QueryEmpty));
    }
}
