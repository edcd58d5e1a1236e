//! `http(s)://hub/...` source: delegates resolution to the registry service's `/v1/resolve`
//! contract, then delegates the actual fetch to whichever concrete source the hub points at
//! (today, always an `oci://` referrer). The hub's own HTTP handlers are out of scope here —
//! this module only speaks the three contracts the core is allowed to depend on:
//! `/v1/resolve`, `/v1/policy/evaluate`, `/v1/capabilities`.

use super::oci::OciSource;
use super::{LocalPacket, PacketReference, Source, UpdateInfo};
use crate::trust::{IssuerKeyTable, TrustReport};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct HubSource {
    base_url: String,
    delegate: OciSource,
    timeout_secs: u64,
}

impl HubSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), delegate: OciSource::new(None, IssuerKeyTable::default()), timeout_secs: 5 }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    uri: String,
    digest: String,
    #[serde(default)]
    refs: Vec<String>,
    trust: Option<TrustReport>,
}

#[derive(Debug, Deserialize)]
pub struct Capabilities {
    pub verify: Vec<String>,
    pub retrieval: Vec<String>,
}

impl HubSource {
    pub fn capabilities(&self) -> Result<Capabilities> {
        let url = format!("{}/v1/capabilities", self.base_url.trim_end_matches('/'));
        let resp = ureq::get(&url).timeout(Duration::from_secs(self.timeout_secs)).call().context("fetching hub capabilities")?;
        resp.into_json().context("parsing hub capabilities")
    }
}

impl Source for HubSource {
    fn can_handle(&self, uri: &str) -> bool {
        uri.starts_with(&self.base_url) || uri.contains("/v1/resolve")
    }

    fn resolve(&self, uri: &str) -> Result<PacketReference> {
        let url = format!("{}/v1/resolve", self.base_url.trim_end_matches('/'));
        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send_json(ureq::json!(ResolveRequest { uri }))
            .with_context(|| format!("resolving {uri} via hub"))?;
        let body: ResolveResponse = resp.into_json().context("parsing hub resolve response")?;
        Ok(PacketReference { uri: body.uri, digest: body.digest, refs: body.refs, trust: body.trust })
    }

    fn fetch(&self, reference: &PacketReference, cache: &super::cas::SourceCache) -> Result<LocalPacket> {
        let oci_ref = reference
            .refs
            .iter()
            .find(|r| r.starts_with("oci://"))
            .ok_or_else(|| anyhow!("hub resolution for {} carried no oci:// referrer to delegate fetch to", reference.uri))?;

        let delegated_reference = PacketReference {
            uri: oci_ref.clone(),
            digest: reference.digest.clone(),
            refs: reference.refs.clone(),
            trust: reference.trust.clone(),
        };
        self.delegate.fetch(&delegated_reference, cache)
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

    #[test]
    fn can_handle_matches_base_url() {
        let hub = HubSource::new("http://hub.example");
        assert!(hub.can_handle("http://hub.example/v1/resolve?source=x"));
        assert!(!hub.can_handle("dir:///tmp/x"));
    }

    #[test]
    fn fetch_without_oci_referrer_fails_clearly() {
        let hub = HubSource::new("http://hub.example");
        let dir = tempfile::tempdir().unwrap();
        let cache = super::super::cas::SourceCache::new(dir.path(), u64::MAX);
        let reference = PacketReference { uri: "http://hub.example/v1/resolve?source=x".into(), digest: "sha256:abc".into(), refs: vec![], trust: None };
        let err = hub.fetch(&reference, &cache).unwrap_err();
        assert!(err.to_string().contains("no oci://"));
    }
}
