//! Content-addressed storage for fetched source payloads (§4.4, §3 "SourceCache entry").
//!
//! Layout: `<workspace>/cache/objects/<2-hex-prefix>/<rest>`. Writes are atomic (temp file +
//! fsync + rename); eviction is strict LRU by atime under a configurable byte quota, and never
//! touches an entry referenced by a currently active fetch.

use crate::hashing::{cas_path_parts, sha256_hex};
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct SourceCache {
    root: PathBuf,
    byte_quota: u64,
    active: Mutex<HashSet<String>>,
}

/// RAII guard marking a digest as actively referenced; held for the duration of a fetch so
/// eviction can never remove it out from under an in-flight reader.
pub struct ActiveGuard<'a> {
    cache: &'a SourceCache,
    digest: String,
}

impl<'a> Drop for ActiveGuard<'a> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.cache.active.lock() {
            active.remove(&self.digest);
        }
    }
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>, byte_quota: u64) -> Self {
        Self { root: root.into(), byte_quota, active: Mutex::new(HashSet::new()) }
    }

    fn object_path(&self, digest_hex: &str) -> PathBuf {
        let (prefix, rest) = cas_path_parts(digest_hex);
        self.root.join(prefix).join(rest)
    }

    /// Marks `digest` as actively in use; returned guard releases it on drop.
    pub fn mark_active(&self, digest_hex: &str) -> ActiveGuard<'_> {
        if let Ok(mut active) = self.active.lock() {
            active.insert(digest_hex.to_string());
        }
        ActiveGuard { cache: self, digest: digest_hex.to_string() }
    }

    /// Idempotent, atomic put: write-temp → fsync → rename. Returns the digest the bytes hashed
    /// to (expected to equal the caller's claimed digest; caller is responsible for the check).
    pub fn put(&self, digest_hex: &str, bytes: &[u8]) -> Result<String> {
        let final_path = self.object_path(digest_hex);
        if final_path.exists() {
            self.touch_atime(&final_path)?;
            return Ok(digest_hex.to_string());
        }

        let parent = final_path.parent().expect("object path always has a parent");
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

        let tmp_path = parent.join(format!(".tmp-{}", sha256_hex(bytes)));
        {
            let mut f = File::create(&tmp_path).with_context(|| format!("creating temp file {}", tmp_path.display()))?;
            f.lock_exclusive().with_context(|| format!("locking temp file {}", tmp_path.display()))?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path).with_context(|| format!("renaming into {}", final_path.display()))?;

        Ok(sha256_hex(bytes))
    }

    /// Returns the stored bytes for `digest`, or `None` if absent. Also bumps the entry's
    /// access time for LRU purposes.
    pub fn get(&self, digest_hex: &str) -> Option<Vec<u8>> {
        let path = self.object_path(digest_hex);
        let bytes = fs::read(&path).ok()?;
        let _ = self.touch_atime(&path);
        Some(bytes)
    }

    pub fn contains(&self, digest_hex: &str) -> bool {
        self.object_path(digest_hex).exists()
    }

    fn touch_atime(&self, path: &Path) -> Result<()> {
        let now = filetime::FileTime::now();
        filetime::set_file_atime(path, now).with_context(|| format!("touching atime on {}", path.display()))
    }

    /// Evicts least-recently-accessed entries until total size is under `byte_quota`. Entries
    /// currently marked active (`mark_active`) are skipped even if they are the oldest.
    pub fn evict_to_quota(&self) -> Result<Vec<String>> {
        let mut entries: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
        let mut total: u64 = 0;

        if !self.root.exists() {
            return Ok(Vec::new());
        }

        for prefix_entry in fs::read_dir(&self.root)? {
            let prefix_entry = prefix_entry?;
            if !prefix_entry.file_type()?.is_dir() {
                continue;
            }
            for obj_entry in fs::read_dir(prefix_entry.path())? {
                let obj_entry = obj_entry?;
                let meta = obj_entry.metadata()?;
                if !meta.is_file() {
                    continue;
                }
                let atime = meta.accessed().unwrap_or(meta.modified()?);
                total += meta.len();
                entries.push((obj_entry.path(), atime, meta.len()));
            }
        }

        if total <= self.byte_quota {
            return Ok(Vec::new());
        }

        entries.sort_by_key(|(_, atime, _)| *atime);

        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let mut evicted = Vec::new();

        for (path, _, size) in entries {
            if total <= self.byte_quota {
                break;
            }
            let digest = digest_from_object_path(&self.root, &path);
            if active.contains(&digest) {
                continue;
            }
            fs::remove_file(&path)?;
            total = total.saturating_sub(size);
            evicted.push(digest);
        }

        Ok(evicted)
    }
}

fn digest_from_object_path(root: &Path, object_path: &Path) -> String {
    let rel = object_path.strip_prefix(root).unwrap_or(object_path);
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
    parts.concat()
}

/// Thin wrapper used by callers that want `put` to also validate the expected digest.
pub fn put_verified(cache: &SourceCache, expected_digest_hex: &str, bytes: &[u8]) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual != expected_digest_hex {
        bail!("digest mismatch: expected {expected_digest_hex}, computed {actual}");
    }
    cache.put(expected_digest_hex, bytes)?;
    Ok(())
}
