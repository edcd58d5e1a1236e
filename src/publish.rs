//! OCI publish layout writer (§4.5 "Publish layout", §6 on-disk packet layout).
//!
//! The registry's low-level HTTP push surface is treated as an external collaborator (§1) —
//! this module builds the artifact tree a real push would upload: `packet.manifest.json`
//! (an OCI manifest carrying a CPM media type), `packet.lock.json`, a `payload/` tree mirroring
//! the on-disk packet layout, and referrer envelopes attached via the `.sig`/`.sbom`/`.prov`
//! tag-fallback convention `OciSource::fetch_referrer_tags` already reads back.

use crate::build::lockfile::Lockfile;
use crate::trust::{ProvenanceStatement, Sbom, SignatureEnvelope};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const CPM_MANIFEST_MEDIA_TYPE: &str = "application/vnd.cpm.packet.manifest.v1+json";

/// `(payload-relative path, media type, required)`. `bm25.bin` is optional — dense-only packets
/// don't write one.
const PAYLOAD_FILES: &[(&str, &str, bool)] = &[
    ("cpm.yml", "application/vnd.cpm.meta.v1+yaml", true),
    ("manifest.json", "application/vnd.cpm.manifest.v1+json", true),
    ("docs.jsonl", "application/vnd.cpm.docs.v1+jsonlines", true),
    ("vectors.f16.bin", "application/vnd.cpm.vectors.v1+binary", true),
    ("faiss/index.faiss", "application/vnd.cpm.index.dense.v1+binary", true),
    ("bm25.bin", "application/vnd.cpm.index.sparse.v1+binary", false),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciPacketManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub layers: Vec<OciDescriptor>,
}

pub struct PublishOptions {
    pub packet_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Hex-encoded Ed25519 signing key seed (32 bytes). No signature referrer is written if absent.
    pub signing_key_hex: Option<String>,
    pub key_id: Option<String>,
    pub issuer: Option<String>,
    pub sbom: Option<Sbom>,
    pub provenance: Option<ProvenanceStatement>,
}

pub struct PublishOutcome {
    /// `sha256:<hex>` digest of `packet.manifest.json`; the packet's immutable identity (§4.5).
    pub digest: String,
    pub out_dir: PathBuf,
    pub referrers: Vec<String>,
}

/// Builds the OCI publish layout under `opts.out_dir` from an already-built packet directory.
/// Copies the fixed set of payload files, writes the OCI-shaped manifest + lockfile, and —
/// when a signing key and/or SBOM/provenance document were supplied — writes referrer envelopes
/// alongside it using the `sha256-<digest>.<ext>` tag-fallback naming.
pub fn run_publish(opts: PublishOptions) -> Result<PublishOutcome> {
    let payload_out = opts.out_dir.join("payload");
    std::fs::create_dir_all(payload_out.join("faiss")).context("creating payload directory")?;

    let mut layers = Vec::new();
    for (rel_path, media_type, required) in PAYLOAD_FILES {
        let src = opts.packet_dir.join(rel_path);
        if !src.exists() {
            if *required {
                return Err(anyhow!("packet directory {} is missing required artifact {rel_path}", opts.packet_dir.display()));
            }
            continue;
        }
        let bytes = std::fs::read(&src).with_context(|| format!("reading {rel_path}"))?;
        let digest = format!("sha256:{}", crate::hashing::sha256_hex(&bytes));

        let dest = payload_out.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &bytes).with_context(|| format!("writing payload/{rel_path}"))?;

        let mut annotations = BTreeMap::new();
        annotations.insert("org.cpm.path".to_string(), rel_path.to_string());
        layers.push(OciDescriptor { media_type: media_type.to_string(), digest, size: bytes.len() as u64, annotations });
    }

    let oci_manifest = OciPacketManifest { media_type: CPM_MANIFEST_MEDIA_TYPE.to_string(), layers };
    let manifest_text = serde_json::to_string_pretty(&oci_manifest)?;
    let manifest_digest = crate::hashing::sha256_hex(manifest_text.as_bytes());
    std::fs::write(opts.out_dir.join("packet.manifest.json"), &manifest_text).context("writing packet.manifest.json")?;

    let subject_digest = format!("sha256:{manifest_digest}");

    if let Ok(lock_text) = std::fs::read_to_string(opts.packet_dir.join("cpm-lock.json")) {
        let mut lock: Lockfile = serde_json::from_str(&lock_text).context("parsing cpm-lock.json")?;
        lock.outputs.insert("packet.manifest.json".to_string(), manifest_digest.clone());
        std::fs::write(opts.out_dir.join("packet.lock.json"), serde_json::to_string_pretty(&lock)?).context("writing packet.lock.json")?;
    }

    let mut referrers = Vec::new();

    if let Some(key_hex) = &opts.signing_key_hex {
        let key_bytes = hex::decode(key_hex).context("signing key must be hex-encoded")?;
        let key_arr: [u8; 32] = key_bytes.try_into().map_err(|_| anyhow!("signing key must decode to 32 bytes"))?;
        let signing_key = SigningKey::from_bytes(&key_arr);
        let signature = signing_key.sign(subject_digest.as_bytes());
        let envelope = SignatureEnvelope {
            key_id: opts.key_id.clone().unwrap_or_else(|| "default".to_string()),
            signature_hex: hex::encode(signature.to_bytes()),
            issuer: opts.issuer.clone(),
        };
        let tag = format!("sha256-{manifest_digest}.sig");
        std::fs::write(opts.out_dir.join(&tag), serde_json::to_string_pretty(&envelope)?)?;
        referrers.push(tag);
    }

    if let Some(sbom) = &opts.sbom {
        let tag = format!("sha256-{manifest_digest}.sbom");
        std::fs::write(opts.out_dir.join(&tag), serde_json::to_string_pretty(sbom)?)?;
        referrers.push(tag);
    }

    if let Some(provenance) = &opts.provenance {
        let tag = format!("sha256-{manifest_digest}.prov");
        std::fs::write(opts.out_dir.join(&tag), serde_json::to_string_pretty(provenance)?)?;
        referrers.push(tag);
    }

    Ok(PublishOutcome { digest: subject_digest, out_dir: opts.out_dir, referrers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn sample_packet_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpm.yml"), "name: pkt\n").unwrap();
        std::fs::write(dir.path().join("manifest.json"), "{}").unwrap();
        std::fs::write(dir.path().join("docs.jsonl"), "{}\n").unwrap();
        std::fs::write(dir.path().join("vectors.f16.bin"), [0u8; 8]).unwrap();
        std::fs::create_dir_all(dir.path().join("faiss")).unwrap();
        std::fs::write(dir.path().join("faiss/index.faiss"), [0u8; 4]).unwrap();
        dir
    }

    #[test]
    fn publish_without_referrers_writes_manifest_and_payload() {
        let packet_dir = sample_packet_dir();
        let out_dir = tempfile::tempdir().unwrap();
        let outcome = run_publish(PublishOptions {
            packet_dir: packet_dir.path().to_path_buf(),
            out_dir: out_dir.path().to_path_buf(),
            signing_key_hex: None,
            key_id: None,
            issuer: None,
            sbom: None,
            provenance: None,
        })
        .unwrap();

        assert!(outcome.digest.starts_with("sha256:"));
        assert!(outcome.referrers.is_empty());
        assert!(out_dir.path().join("packet.manifest.json").exists());
        assert!(out_dir.path().join("payload/docs.jsonl").exists());
        assert!(out_dir.path().join("payload/faiss/index.faiss").exists());
    }

    #[test]
    fn publish_fails_when_required_artifact_missing() {
        let packet_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let err = run_publish(PublishOptions {
            packet_dir: packet_dir.path().to_path_buf(),
            out_dir: out_dir.path().to_path_buf(),
            signing_key_hex: None,
            key_id: None,
            issuer: None,
            sbom: None,
            provenance: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("missing required artifact"));
    }

    #[test]
    fn publish_with_signing_key_writes_a_verifiable_sig_referrer() {
        let packet_dir = sample_packet_dir();
        let out_dir = tempfile::tempdir().unwrap();
        let signing_key = SigningKey::from_bytes(&[9u8; 32]);
        let key_hex = hex::encode(signing_key.to_bytes());

        let outcome = run_publish(PublishOptions {
            packet_dir: packet_dir.path().to_path_buf(),
            out_dir: out_dir.path().to_path_buf(),
            signing_key_hex: Some(key_hex),
            key_id: Some("key-1".to_string()),
            issuer: Some("ci".to_string()),
            sbom: None,
            provenance: None,
        })
        .unwrap();

        assert_eq!(outcome.referrers.len(), 1);
        let sig_path = out_dir.path().join(&outcome.referrers[0]);
        let envelope: SignatureEnvelope = serde_json::from_str(&std::fs::read_to_string(sig_path).unwrap()).unwrap();

        let mut keys = crate::trust::IssuerKeyTable::default();
        keys.keys.insert("key-1".to_string(), hex::encode(signing_key.verifying_key().to_bytes()));
        let check = crate::trust::verify_signature(&envelope, &outcome.digest, &keys);
        assert!(check.valid);
    }
}
