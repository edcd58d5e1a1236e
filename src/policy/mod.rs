//! Policy engine (§4.6): gates sources, trust, and token budget for every operation.
//!
//! `policy.yml` is assembled by deep-merging, ascending priority: a built-in default, the
//! workspace-level `policy.yml`, and an optional packet-local `policy.override.yml`. The merge
//! itself (object-recursive, array-union, scalar-overwrite) is the same algorithm this codebase
//! already uses to combine its tiered rule files, generalized here from coding-style rules to
//! policy documents.

use crate::trust::{IssuerKeyTable, TrustReport, TrustWeights};
use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Strict,
    Warn,
}

impl Default for PolicyMode {
    fn default() -> Self {
        PolicyMode::Warn
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequireFlags {
    pub signature: bool,
    pub sbom: bool,
    pub provenance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub mode: PolicyMode,
    pub allowed_sources: Vec<String>,
    pub min_trust_score: f64,
    pub max_tokens: Option<usize>,
    pub require: RequireFlags,
    pub trust_weights: TrustWeights,
    /// Issuer public keys (key id -> hex Ed25519 verifying key), used to verify signature
    /// referrers an `OciSource` collects during `resolve` (§4.5 step 1).
    pub issuer_keys: IssuerKeyTable,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Warn,
            allowed_sources: vec!["*".to_string()],
            min_trust_score: 0.0,
            max_tokens: None,
            require: RequireFlags::default(),
            trust_weights: TrustWeights::default(),
            issuer_keys: IssuerKeyTable::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Build,
    Install,
    Query,
    Fetch,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub source_uri: String,
    pub trust: Option<TrustReport>,
    pub tokens: Option<usize>,
    pub declared_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny { reasons: Vec<String> },
    Warn { reasons: Vec<String> },
}

impl Decision {
    pub fn is_allowed_to_proceed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }
}

fn source_allowed(uri: &str, allowed_globs: &[String]) -> bool {
    allowed_globs.iter().any(|g| Pattern::new(g).map(|p| p.matches(uri)).unwrap_or(false))
}

/// Evaluates local policy rules only (no remote hub call). See `evaluate` for the full
/// local+remote pipeline.
pub fn evaluate_local(policy: &Policy, _op: OperationKind, ctx: &PolicyContext) -> Decision {
    let mut reasons = Vec::new();

    if !source_allowed(&ctx.source_uri, &policy.allowed_sources) {
        reasons.push(format!("source '{}' does not match any allowed_sources glob", ctx.source_uri));
    }

    if let Some(trust) = &ctx.trust {
        if trust.score < policy.min_trust_score {
            reasons.push(format!("trust score {:.2} below min_trust_score {:.2}", trust.score, policy.min_trust_score));
        }
        if policy.require.signature && !(trust.signature.present && trust.signature.valid) {
            reasons.push("required signature missing or invalid".to_string());
        }
        if policy.require.sbom && !(trust.sbom.present && trust.sbom.valid) {
            reasons.push("required sbom missing or invalid".to_string());
        }
        if policy.require.provenance && !(trust.provenance.present && trust.provenance.valid) {
            reasons.push("required provenance missing or invalid".to_string());
        }
    }

    if let (Some(max), Some(used)) = (policy.max_tokens, ctx.tokens) {
        if used > max {
            reasons.push(format!("token budget exceeded: {used} > {max}"));
        }
    }

    if reasons.is_empty() {
        return Decision::Allow;
    }

    match policy.mode {
        PolicyMode::Strict => Decision::Deny { reasons },
        PolicyMode::Warn => Decision::Warn { reasons },
    }
}

#[derive(Debug, Serialize)]
struct RemotePolicyRequest<'a> {
    policy: &'a Policy,
    context: RemotePolicyContext<'a>,
}

#[derive(Debug, Serialize)]
struct RemotePolicyContext<'a> {
    source_uri: &'a str,
    tokens: Option<usize>,
    declared_model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RemotePolicyResponse {
    decision: String,
    reasons: Vec<String>,
}

/// POSTs the context to the hub's `/v1/policy/evaluate`. Fail-closed when
/// `enforce_remote_policy=true` (a hub error becomes a deny), fail-open otherwise (a hub error
/// is swallowed and local decision stands) — §4.6.
pub fn evaluate_remote(hub_url: &str, policy: &Policy, ctx: &PolicyContext, enforce: bool, timeout_secs: u64) -> Result<Decision> {
    let req = RemotePolicyRequest {
        policy,
        context: RemotePolicyContext {
            source_uri: &ctx.source_uri,
            tokens: ctx.tokens,
            declared_model: ctx.declared_model.as_deref(),
        },
    };

    let url = format!("{}/v1/policy/evaluate", hub_url.trim_end_matches('/'));
    let result = ureq::post(&url)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .send_json(ureq::json!(req));

    match result {
        Ok(resp) => {
            let body: RemotePolicyResponse = resp.into_json().context("parsing hub policy response")?;
            Ok(match body.decision.as_str() {
                "deny" => Decision::Deny { reasons: body.reasons },
                "warn" => Decision::Warn { reasons: body.reasons },
                _ => Decision::Allow,
            })
        }
        Err(err) => {
            crate::debug_log!("hub policy evaluation failed: {err}");
            if enforce {
                Ok(Decision::Deny { reasons: vec![format!("hub policy evaluation unreachable: {err}")] })
            } else {
                Ok(Decision::Allow)
            }
        }
    }
}

/// Combines local and optional remote evaluation: a deny from either is final (§4.6).
pub fn combine(local: Decision, remote: Option<Decision>) -> Decision {
    match (local, remote) {
        (Decision::Deny { mut reasons }, Some(Decision::Deny { reasons: r2 })) => {
            reasons.extend(r2);
            Decision::Deny { reasons }
        }
        (Decision::Deny { reasons }, _) => Decision::Deny { reasons },
        (_, Some(Decision::Deny { reasons })) => Decision::Deny { reasons },
        (Decision::Warn { mut reasons }, Some(Decision::Warn { reasons: r2 })) => {
            reasons.extend(r2);
            Decision::Warn { reasons }
        }
        (Decision::Warn { reasons }, _) => Decision::Warn { reasons },
        (_, Some(Decision::Warn { reasons })) => Decision::Warn { reasons },
        (Decision::Allow, _) => Decision::Allow,
    }
}

/// Recursively merges `src` into `dst`: objects merge key-by-key, arrays union (dedup by
/// value), scalars are overwritten by `src`.
pub fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (k, v) in s {
                deep_merge(d.entry(k).or_insert(Value::Null), v);
            }
        }
        (Value::Array(d), Value::Array(s)) => {
            for item in s {
                if !d.contains(&item) {
                    d.push(item);
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

fn read_yaml_as_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let yaml_val: serde_yaml::Value = serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    let json_str = serde_json::to_string(&yaml_val)?;
    serde_json::from_str(&json_str).context("converting yaml to json")
}

/// Loads and deep-merges the 3-tier policy document: built-in default < workspace `policy.yml`
/// < packet-local `policy.override.yml`. Fail-open: any tier that is missing or fails to parse
/// is treated as empty rather than aborting the load.
pub fn load_policy(workspace_policy_path: &Path, packet_override_path: Option<&Path>) -> Policy {
    let default_value = serde_json::to_value(Policy::default()).unwrap_or(Value::Object(Default::default()));
    let mut merged = default_value;

    if let Ok(workspace_value) = read_yaml_as_json(workspace_policy_path) {
        deep_merge(&mut merged, workspace_value);
    } else {
        crate::debug_log!("no workspace policy.yml at {}; using defaults for this tier", workspace_policy_path.display());
    }

    if let Some(p) = packet_override_path {
        if let Ok(override_value) = read_yaml_as_json(p) {
            deep_merge(&mut merged, override_value);
        }
    }

    serde_json::from_value(merged).unwrap_or_else(|err| {
        crate::debug_log!("merged policy document failed to deserialize: {err}; using defaults");
        Policy::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustReport;

    fn allow_ctx() -> PolicyContext {
        PolicyContext { source_uri: "dir:///tmp/x".to_string(), trust: None, tokens: None, declared_model: None }
    }

    #[test]
    fn disallowed_source_denies_in_strict_mode() {
        let policy = Policy { mode: PolicyMode::Strict, allowed_sources: vec!["oci://registry.example/*".to_string()], ..Policy::default() };
        let decision = evaluate_local(&policy, OperationKind::Query, &allow_ctx());
        assert!(matches!(decision, Decision::Deny { .. }));
    }

    #[test]
    fn disallowed_source_warns_in_warn_mode() {
        let policy = Policy { mode: PolicyMode::Warn, allowed_sources: vec!["oci://registry.example/*".to_string()], ..Policy::default() };
        let decision = evaluate_local(&policy, OperationKind::Query, &allow_ctx());
        assert!(matches!(decision, Decision::Warn { .. }));
    }

    #[test]
    fn allowed_wildcard_source_with_no_trust_requirement_allows() {
        let policy = Policy::default();
        let decision = evaluate_local(&policy, OperationKind::Query, &allow_ctx());
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn low_trust_score_denies_when_strict() {
        let policy = Policy { mode: PolicyMode::Strict, min_trust_score: 0.8, ..Policy::default() };
        let mut ctx = allow_ctx();
        ctx.trust = Some(TrustReport { score: 0.3, ..TrustReport::default() });
        let decision = evaluate_local(&policy, OperationKind::Install, &ctx);
        assert!(matches!(decision, Decision::Deny { .. }));
    }

    #[test]
    fn max_tokens_exceeded_denies() {
        let policy = Policy { mode: PolicyMode::Strict, max_tokens: Some(100), ..Policy::default() };
        let mut ctx = allow_ctx();
        ctx.tokens = Some(150);
        let decision = evaluate_local(&policy, OperationKind::Query, &ctx);
        assert!(matches!(decision, Decision::Deny { .. }));
    }

    #[test]
    fn combine_prefers_deny_from_either_side() {
        let local = Decision::Allow;
        let remote = Some(Decision::Deny { reasons: vec!["remote said no".to_string()] });
        assert!(matches!(combine(local, remote), Decision::Deny { .. }));
    }

    #[test]
    fn deep_merge_overrides_scalars_and_unions_arrays() {
        let mut dst = serde_json::json!({"mode": "warn", "allowed_sources": ["a"]});
        let src = serde_json::json!({"mode": "strict", "allowed_sources": ["b"]});
        deep_merge(&mut dst, src);
        assert_eq!(dst["mode"], "strict");
        assert_eq!(dst["allowed_sources"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn missing_policy_yml_falls_back_to_default_policy() {
        let dir = tempfile::tempdir().unwrap();
        let policy = load_policy(&dir.path().join("policy.yml"), None);
        assert_eq!(policy.mode, PolicyMode::Warn);
    }

    #[test]
    fn workspace_policy_yml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yml");
        std::fs::write(&path, "mode: strict\nmin_trust_score: 0.9\n").unwrap();
        let policy = load_policy(&path, None);
        assert_eq!(policy.mode, PolicyMode::Strict);
        assert!((policy.min_trust_score - 0.9).abs() < 1e-9);
    }
}
