//! Workspace layout and pipeline configuration.
//!
//! Config structs are `serde`-derived with `#[serde(default)]` on every field and an explicit
//! `Default` impl. Loading is fail-open: a missing or malformed config file falls back to
//! defaults with a `debug_log!` warning, never a hard error — the pattern the rest of this
//! codebase already uses for its own config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_chunk_tokens() -> usize {
    256
}
fn default_overlap_tokens() -> usize {
    32
}
fn default_hard_cap_tokens() -> usize {
    1024
}
fn default_micro_chunk_tokens() -> usize {
    64
}
fn default_batch_size() -> usize {
    32
}
fn default_worker_pool() -> usize {
    8
}
fn default_embedder_url() -> String {
    "http://127.0.0.1:8088".to_string()
}
fn default_embedder_timeout_secs() -> u64 {
    120
}
fn default_oci_timeout_secs() -> u64 {
    300
}
fn default_hub_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub hard_cap_tokens: usize,
    pub include_source_preamble: bool,
    pub hierarchical: bool,
    pub micro_chunk_tokens: usize,
    pub emit_parent_chunks: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            hard_cap_tokens: default_hard_cap_tokens(),
            include_source_preamble: true,
            hierarchical: false,
            micro_chunk_tokens: default_micro_chunk_tokens(),
            emit_parent_chunks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dim: usize,
    pub normalized: bool,
    pub max_seq_length: usize,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            dim: 384,
            normalized: true,
            max_seq_length: 512,
            endpoint: default_embedder_url(),
            timeout_secs: default_embedder_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub worker_pool: usize,
    pub hybrid_retrieval: bool,
    pub archive: Option<String>,
    pub write_lock_snapshot: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            worker_pool: default_worker_pool(),
            hybrid_retrieval: true,
            archive: None,
            write_lock_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub oci_timeout_secs: u64,
    pub hub_timeout_secs: u64,
    pub hub_url: Option<String>,
    pub enforce_remote_policy: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            oci_timeout_secs: default_oci_timeout_secs(),
            hub_timeout_secs: default_hub_timeout_secs(),
            hub_url: None,
            enforce_remote_policy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub build: BuildConfig,
    pub network: NetworkConfig,
    pub cache_byte_quota: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            build: BuildConfig::default(),
            network: NetworkConfig::default(),
            cache_byte_quota: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// Resolved filesystem layout for a workspace (§6 "Workspace layout").
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.packages_dir().join(name).join(version)
    }

    pub fn cache_objects_dir(&self) -> PathBuf {
        self.root.join("cache").join("objects")
    }

    pub fn cache_embed_dir(&self, model: &str) -> PathBuf {
        self.root.join("cache").join("embed").join(model)
    }

    pub fn state_locks_dir(&self, packet: &str) -> PathBuf {
        self.root.join("state").join("locks").join(packet)
    }

    pub fn state_replay_dir(&self) -> PathBuf {
        self.root.join("state").join("replay")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.root.join("policy.yml")
    }

    pub fn embeddings_config_path(&self) -> PathBuf {
        self.root.join("config").join("embeddings.yml")
    }

    pub fn workspace_config_path(&self) -> PathBuf {
        self.root.join("workspace.yml")
    }

    pub fn build_lock_path(&self, destination: &Path) -> PathBuf {
        destination.join(".build.lock")
    }
}

/// Loads `workspace.yml` from the workspace root. Fail-open: missing file or parse error both
/// fall back to `WorkspaceConfig::default()`.
pub fn load_workspace_config(layout: &WorkspaceLayout) -> WorkspaceConfig {
    let path = layout.workspace_config_path();
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_yaml::from_str(&text).unwrap_or_else(|err| {
            crate::debug_log!("workspace.yml parse error at {}: {err}; using defaults", path.display());
            WorkspaceConfig::default()
        }),
        Err(_) => {
            crate::debug_log!("no workspace.yml at {}; using defaults", path.display());
            WorkspaceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let cfg = WorkspaceConfig::default();
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back: WorkspaceConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.chunking.chunk_tokens, cfg.chunking.chunk_tokens);
    }

    #[test]
    fn missing_workspace_yml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let cfg = load_workspace_config(&layout);
        assert_eq!(cfg.embedding.dim, EmbeddingConfig::default().dim);
    }

    #[test]
    fn malformed_workspace_yml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workspace.yml"), "not: [valid: yaml:::").unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let cfg = load_workspace_config(&layout);
        assert_eq!(cfg.build.worker_pool, BuildConfig::default().worker_pool);
    }

    #[test]
    fn package_dir_layout_matches_spec() {
        let layout = WorkspaceLayout::new("/ws");
        assert_eq!(layout.package_dir("foo", "1.0.0"), PathBuf::from("/ws/packages/foo/1.0.0"));
    }
}
