//! HTTP embedder client (§4.3): the embedding model itself is an external collaborator reached
//! over HTTP, same treatment as the OCI registry and hub in `source::oci`/`source::hub`. Batches
//! requests to `embedding.batch_size`, retries transient failures with exponential backoff.

use crate::config::EmbeddingConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbedOptions {
    max_seq_length: usize,
    normalize: bool,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    options: EmbedOptions,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    dimension: Option<usize>,
}

pub struct EmbedderClient {
    endpoint: String,
    model: String,
    dim: usize,
    max_seq_length: usize,
    normalize: bool,
    timeout_secs: u64,
    max_retries: u32,
    initial_backoff_ms: u64,
    batch_size: usize,
}

impl EmbedderClient {
    pub fn from_config(cfg: &EmbeddingConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            dim: cfg.dim,
            max_seq_length: cfg.max_seq_length,
            normalize: cfg.normalized,
            timeout_secs: cfg.timeout_secs,
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
            batch_size: cfg.batch_size.max(1),
        }
    }

    /// `GET /health` (§6 "Embedder HTTP"): `true` iff the embedder reports `{"status":"ok"}`.
    pub fn health(&self) -> Result<bool> {
        let resp = ureq::get(&format!("{}/health", self.endpoint))
            .timeout(Duration::from_secs(self.timeout_secs))
            .call()
            .context("embedder health check failed")?;
        let body: serde_json::Value = resp.into_json().context("parsing embedder health response")?;
        Ok(body.get("status").and_then(|s| s.as_str()) == Some("ok"))
    }

    /// Embeds `texts` in `batch_size`-sized requests, preserving input order.
    pub fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch_with_retry(batch)?);
        }
        Ok(out)
    }

    fn embed_batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.embed_batch_once(batch) {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt + 1 < self.max_retries => {
                    let delay = backoff_delay(attempt, self.initial_backoff_ms);
                    crate::debug_log!("embedder call failed (attempt {}/{}): {err}; retrying in {:?}", attempt + 1, self.max_retries, delay);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err).context(format!("embedder call failed after {} attempts", self.max_retries)),
            }
        }
    }

    fn embed_batch_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.model,
            texts: batch,
            options: EmbedOptions { max_seq_length: self.max_seq_length, normalize: self.normalize },
        };
        let resp = ureq::post(&format!("{}/embed", self.endpoint))
            .timeout(Duration::from_secs(self.timeout_secs))
            .send_json(ureq::json!(body))
            .context("embedder request failed")?;
        let parsed: EmbedResponse = resp.into_json().context("parsing embedder response json")?;
        if parsed.embeddings.len() != batch.len() {
            bail!("embedder returned {} vectors for {} inputs", parsed.embeddings.len(), batch.len());
        }
        for v in &parsed.embeddings {
            if v.len() != self.dim {
                bail!("embedder returned vector of dim {} but config declares dim {}", v.len(), self.dim);
            }
        }
        Ok(parsed.embeddings)
    }
}

/// Exponential backoff: `initial_backoff_ms * 2^attempt`, capped at 30s so a misbehaving
/// embedder can't stall a build indefinitely between retries.
pub fn backoff_delay(attempt: u32, initial_backoff_ms: u64) -> Duration {
    let capped_attempt = attempt.min(16);
    let ms = initial_backoff_ms.saturating_mul(1u64 << capped_attempt).min(30_000);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(0, 200), Duration::from_millis(200));
        assert_eq!(backoff_delay(1, 200), Duration::from_millis(400));
        assert_eq!(backoff_delay(2, 200), Duration::from_millis(800));
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay(30, 200), Duration::from_millis(30_000));
    }

    #[test]
    fn client_batches_requests_by_batch_size() {
        let cfg = EmbeddingConfig { batch_size: 2, ..EmbeddingConfig::default() };
        let client = EmbedderClient::from_config(&cfg);
        assert_eq!(client.batch_size, 2);
    }
}
