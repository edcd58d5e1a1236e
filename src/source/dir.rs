//! `dir://path` (or a plain filesystem path) source: resolves directly to a local packet
//! directory. No network, no CAS write needed on resolve — only `fetch` verifies the manifest
//! is actually readable.

use super::{LocalPacket, PacketReference, Source, UpdateInfo};
use crate::build::{lockfile, manifest};
use crate::hashing::sha256_file;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct DirSource;

fn strip_scheme(uri: &str) -> &str {
    uri.strip_prefix("dir://").unwrap_or(uri)
}

fn packet_dir(uri: &str) -> PathBuf {
    PathBuf::from(strip_scheme(uri))
}

impl Source for DirSource {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with("dir://") || (!uri.contains("://") && Path::new(uri).is_dir())
    }

    fn resolve(&self, uri: &str) -> Result<PacketReference> {
        let dir = packet_dir(uri);
        let manifest_path = dir.join("manifest.json");
        let digest = sha256_file(&manifest_path)
            .with_context(|| format!("hashing manifest at {}", manifest_path.display()))?;
        Ok(PacketReference { uri: uri.to_string(), digest: format!("sha256:{digest}"), refs: Vec::new(), trust: None })
    }

    fn fetch(&self, reference: &PacketReference, _cache: &super::cas::SourceCache) -> Result<LocalPacket> {
        let dir = packet_dir(&reference.uri);
        let manifest_path = dir.join("manifest.json");
        let manifest_text = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let manifest: manifest::PacketManifest = serde_json::from_str(&manifest_text)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;

        let lock_path = dir.join("cpm-lock.json");
        let lock = std::fs::read_to_string(&lock_path)
            .ok()
            .and_then(|text| serde_json::from_str::<lockfile::Lockfile>(&text).ok());

        Ok(LocalPacket { path: dir, manifest, lock, trust: None })
    }

    fn check_updates(&self, reference: &PacketReference) -> Result<UpdateInfo> {
        let latest = self.resolve(&reference.uri)?;
        Ok(UpdateInfo {
            latest_digest: latest.digest.clone(),
            current_digest: reference.digest.clone(),
            newer: latest.digest != reference.digest,
            refs: latest.refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::manifest::{EmbeddingMeta, IncrementalCounts, PacketCounts, PacketManifest};

    fn write_minimal_packet(dir: &Path) {
        let manifest = PacketManifest {
            schema_version: 1,
            packet_id: "demo".to_string(),
            version: "0.1.0".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            embedding: EmbeddingMeta { model: "m".to_string(), dim: 4, dtype: "float16".to_string(), normalized: true, max_seq_length: 512 },
            counts: PacketCounts { docs: 0, vectors: 0 },
            incremental: IncrementalCounts { reused: 0, embedded: 0, removed: 0 },
            checksums: Default::default(),
        };
        std::fs::write(dir.join("manifest.json"), serde_json::to_string(&manifest).unwrap()).unwrap();
    }

    #[test]
    fn resolve_then_fetch_round_trips_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_packet(dir.path());

        let source = DirSource;
        let uri = format!("dir://{}", dir.path().display());
        let reference = source.resolve(&uri).unwrap();
        assert!(reference.digest.starts_with("sha256:"));

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = super::super::cas::SourceCache::new(cache_dir.path(), u64::MAX);
        let local = source.fetch(&reference, &cache).unwrap();
        assert_eq!(local.manifest.packet_id, "demo");
    }

    #[test]
    fn check_updates_reports_no_change_for_identical_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_packet(dir.path());
        let source = DirSource;
        let uri = format!("dir://{}", dir.path().display());
        let reference = source.resolve(&uri).unwrap();
        let update = source.check_updates(&reference).unwrap();
        assert!(!update.newer);
    }

    #[test]
    fn can_handle_plain_path_to_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirSource;
        assert!(source.can_handle(dir.path().to_str().unwrap()));
        assert!(!source.can_handle("oci://registry.example/repo/name@1.0.0"));
    }
}
