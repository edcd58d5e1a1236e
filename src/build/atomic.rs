//! Write-temp + rename, used for every artifact this crate persists: manifests, lockfiles,
//! lock snapshots, replay logs, `docs.jsonl`, `vectors.f16.bin`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let tmp_path = parent.join(format!(".tmp-{}", path.file_name().unwrap_or_default().to_string_lossy()));
    {
        let mut f = File::create(&tmp_path).with_context(|| format!("creating temp file {}", tmp_path.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Removes a temp file left behind by an aborted atomic write (§4.2 failure semantics:
/// "any atomic-write failure rolls back by deleting the temp files").
pub fn cleanup_temp(path: &Path) {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = parent.join(format!(".tmp-{}", path.file_name().unwrap_or_default().to_string_lossy()));
    let _ = fs::remove_file(tmp_path);
}
