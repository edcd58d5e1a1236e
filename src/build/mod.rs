//! Build pipeline (§4.2): turns a source directory into a packet's on-disk artifacts
//! (`docs.jsonl`, `vectors.f16.bin`, `faiss/index.faiss`, `manifest.json`, `cpm.yml`,
//! `cpm-lock.json`) under an exclusive per-destination lock.

pub mod atomic;
pub mod embed_cache;
pub mod lockfile;
pub mod manifest;
pub mod pipeline;

pub use pipeline::{run_build, BuildOptions, BuildOutcome};
