//! Diff/drift between two packet versions (§4.10): pairs chunks by id, classifies
//! added/removed/changed/unchanged, and reports a drift score as the mean cosine distance over
//! paired vectors. `--max-drift` turns the score into a build/CI gate.

use crate::error::CpmError;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct DiffChunk {
    pub chunk_id: String,
    pub path: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub chunk_id: String,
    pub path: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
pub struct PathDrift {
    pub path: String,
    pub mean_distance: f64,
    pub paired: usize,
}

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub entries: Vec<DiffEntry>,
    pub drift_score: f64,
    pub per_path: Vec<PathDrift>,
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

pub fn diff(old: &[DiffChunk], new: &[DiffChunk]) -> DiffReport {
    let old_by_id: HashMap<&str, &DiffChunk> = old.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
    let new_by_id: HashMap<&str, &DiffChunk> = new.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

    let mut entries = Vec::new();
    let mut distances: Vec<f64> = Vec::new();
    let mut path_distances: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for chunk in new {
        match old_by_id.get(chunk.chunk_id.as_str()) {
            None => entries.push(DiffEntry { chunk_id: chunk.chunk_id.clone(), path: chunk.path.clone(), kind: ChangeKind::Added }),
            Some(prev) => {
                let kind = if prev.content_hash == chunk.content_hash { ChangeKind::Unchanged } else { ChangeKind::Changed };
                // §4.10: drift is the mean cosine distance over `changed` pairs only.
                if kind == ChangeKind::Changed {
                    let distance = 1.0 - cosine(&prev.vector, &chunk.vector);
                    distances.push(distance);
                    path_distances.entry(chunk.path.clone()).or_default().push(distance);
                }
                entries.push(DiffEntry { chunk_id: chunk.chunk_id.clone(), path: chunk.path.clone(), kind });
            }
        }
    }
    for chunk in old {
        if !new_by_id.contains_key(chunk.chunk_id.as_str()) {
            entries.push(DiffEntry { chunk_id: chunk.chunk_id.clone(), path: chunk.path.clone(), kind: ChangeKind::Removed });
        }
    }

    let drift_score = if distances.is_empty() { 0.0 } else { distances.iter().sum::<f64>() / distances.len() as f64 };
    let per_path = path_distances
        .into_iter()
        .map(|(path, ds)| PathDrift { path, mean_distance: ds.iter().sum::<f64>() / ds.len() as f64, paired: ds.len() })
        .collect();

    DiffReport { entries, drift_score, per_path }
}

/// `--max-drift` gate: returns `Err(CpmError::DriftGateFailed)` (exit code 6) when the report's
/// drift score exceeds the caller-supplied ceiling.
pub fn check_drift_gate(report: &DiffReport, max_drift: f64) -> Result<(), CpmError> {
    if report.drift_score > max_drift {
        Err(CpmError::DriftGateFailed { drift: report.drift_score, max: max_drift })
    } else {
        Ok(())
    }
}
