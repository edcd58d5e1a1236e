//! Signature, SBOM, and provenance verification for OCI-sourced packets (§4.5).

use crate::error::{CpmError, TrustAspect};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignatureCheck {
    pub present: bool,
    pub valid: bool,
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SbomCheck {
    pub present: bool,
    pub valid: bool,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvenanceCheck {
    pub present: bool,
    pub valid: bool,
    pub slsa_level: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustReport {
    pub signature: SignatureCheck,
    pub sbom: SbomCheck,
    pub provenance: ProvenanceCheck,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl Default for TrustReport {
    fn default() -> Self {
        Self {
            signature: SignatureCheck::default(),
            sbom: SbomCheck::default(),
            provenance: ProvenanceCheck::default(),
            score: 0.0,
            reasons: vec!["no referrers present".to_string()],
        }
    }
}

/// Weighting of the three trust components, policy-tunable (Open Question (b)). Must sum to
/// 1.0 at load time; callers fall back to the spec defaults otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustWeights {
    pub signature: f64,
    pub sbom: f64,
    pub provenance: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self { signature: 0.5, sbom: 0.25, provenance: 0.25 }
    }
}

impl TrustWeights {
    pub fn normalized_or_default(self) -> Self {
        let sum = self.signature + self.sbom + self.provenance;
        if (sum - 1.0).abs() > 1e-6 {
            crate::debug_log!("trust weights sum to {sum}, not 1.0; falling back to defaults");
            return Self::default();
        }
        self
    }
}

/// A cosign-style signature envelope: raw bytes over the manifest digest, verified with
/// Ed25519 against an issuer key resolved by key id (§4.5 "Signature primitive").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub key_id: String,
    pub signature_hex: String,
    pub issuer: Option<String>,
}

/// Table of issuer public keys, keyed by key id, as configured in `policy.yml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuerKeyTable {
    #[serde(flatten)]
    pub keys: HashMap<String, String>,
}

/// Minimal CycloneDX/SPDX SBOM: enough structure to check referenced artifact digests are
/// present, without pulling in a full schema validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sbom {
    pub format: String,
    pub artifact_digests: Vec<String>,
}

/// Minimal in-toto / SLSA provenance statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceStatement {
    pub predicate_type: String,
    pub slsa_level: u8,
}

/// Verifies a signature envelope against the manifest digest using the configured issuer keys.
pub fn verify_signature(
    envelope: &SignatureEnvelope,
    manifest_digest: &str,
    keys: &IssuerKeyTable,
) -> SignatureCheck {
    let key_hex = match keys.keys.get(&envelope.key_id) {
        Some(k) => k,
        None => {
            return SignatureCheck { present: true, valid: false, issuer: envelope.issuer.clone() };
        }
    };

    let valid = (|| -> Option<bool> {
        let key_bytes = hex::decode(key_hex).ok()?;
        let key_arr: [u8; 32] = key_bytes.try_into().ok()?;
        let verifying_key = VerifyingKey::from_bytes(&key_arr).ok()?;
        let sig_bytes = hex::decode(&envelope.signature_hex).ok()?;
        let sig_arr: [u8; 64] = sig_bytes.try_into().ok()?;
        let signature = Signature::from_bytes(&sig_arr);
        Some(verifying_key.verify(manifest_digest.as_bytes(), &signature).is_ok())
    })()
    .unwrap_or(false);

    SignatureCheck { present: true, valid, issuer: envelope.issuer.clone() }
}

pub fn verify_sbom(sbom: &Sbom, required_digests: &[String]) -> SbomCheck {
    let valid = required_digests.iter().all(|d| sbom.artifact_digests.iter().any(|sd| sd == d));
    SbomCheck { present: true, valid, format: Some(sbom.format.clone()) }
}

pub fn verify_provenance(statement: &ProvenanceStatement) -> ProvenanceCheck {
    ProvenanceCheck {
        present: true,
        valid: !statement.predicate_type.is_empty(),
        slsa_level: Some(statement.slsa_level),
    }
}

/// Builds the final `TrustReport` from the individual checks and computes the weighted score
/// (§4.5 step 4).
pub fn build_report(
    signature: SignatureCheck,
    sbom: SbomCheck,
    provenance: ProvenanceCheck,
    weights: TrustWeights,
) -> TrustReport {
    let weights = weights.normalized_or_default();
    let sig_ok = if signature.present && signature.valid { 1.0 } else { 0.0 };
    let sbom_ok = if sbom.present && sbom.valid { 1.0 } else { 0.0 };
    let prov_ok = if provenance.present && provenance.valid { 1.0 } else { 0.0 };

    let score = weights.signature * sig_ok + weights.sbom * sbom_ok + weights.provenance * prov_ok;

    let mut reasons = Vec::new();
    if !signature.present {
        reasons.push("signature referrer missing".to_string());
    } else if !signature.valid {
        reasons.push("signature verification failed".to_string());
    }
    if !sbom.present {
        reasons.push("sbom referrer missing".to_string());
    } else if !sbom.valid {
        reasons.push("sbom validation failed".to_string());
    }
    if !provenance.present {
        reasons.push("provenance referrer missing".to_string());
    } else if !provenance.valid {
        reasons.push("provenance validation failed".to_string());
    }

    TrustReport { signature, sbom, provenance, score, reasons }
}

#[derive(Debug, Clone, Default)]
pub struct TrustRequirements {
    pub require_signature: bool,
    pub require_sbom: bool,
    pub require_provenance: bool,
    pub min_trust_score: f64,
}

/// Enforces §4.5 "Policy interaction" / §4.6 strict-mode verification steps against a built
/// `TrustReport`. Returns the first violated aspect, if any.
pub fn check_requirements(report: &TrustReport, reqs: &TrustRequirements) -> Result<(), CpmError> {
    if reqs.require_signature && !(report.signature.present && report.signature.valid) {
        return Err(CpmError::TrustViolation { aspect: TrustAspect::Signature });
    }
    if reqs.require_sbom && !(report.sbom.present && report.sbom.valid) {
        return Err(CpmError::TrustViolation { aspect: TrustAspect::Sbom });
    }
    if reqs.require_provenance && !(report.provenance.present && report.provenance.valid) {
        return Err(CpmError::TrustViolation { aspect: TrustAspect::Provenance });
    }
    if report.score < reqs.min_trust_score {
        return Err(CpmError::TrustViolation { aspect: TrustAspect::Score });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn fixed_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn build_report_default_weights_all_present_scores_one() {
        let report = build_report(
            SignatureCheck { present: true, valid: true, issuer: None },
            SbomCheck { present: true, valid: true, format: None },
            ProvenanceCheck { present: true, valid: true, slsa_level: Some(3) },
            TrustWeights::default(),
        );
        assert!((report.score - 1.0).abs() < 1e-9);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn missing_signature_yields_half_score_with_default_weights() {
        let report = build_report(
            SignatureCheck::default(),
            SbomCheck { present: true, valid: true, format: None },
            ProvenanceCheck { present: true, valid: true, slsa_level: None },
            TrustWeights::default(),
        );
        assert!((report.score - 0.5).abs() < 1e-9);
        assert_eq!(report.reasons, vec!["signature referrer missing".to_string()]);
    }

    #[test]
    fn strict_requirements_reject_missing_signature() {
        let report = TrustReport::default();
        let reqs = TrustRequirements { require_signature: true, ..Default::default() };
        let err = check_requirements(&report, &reqs).unwrap_err();
        assert!(matches!(err, CpmError::TrustViolation { aspect: TrustAspect::Signature }));
    }

    #[test]
    fn signature_round_trips_through_real_ed25519_keys() {
        let signing_key = fixed_signing_key();
        let digest = "sha256:abcdef";
        let signature = signing_key.sign(digest.as_bytes());

        let mut keys = IssuerKeyTable::default();
        keys.keys.insert("key-1".to_string(), hex::encode(signing_key.verifying_key().to_bytes()));

        let envelope = SignatureEnvelope {
            key_id: "key-1".to_string(),
            signature_hex: hex::encode(signature.to_bytes()),
            issuer: Some("test-issuer".to_string()),
        };

        let check = verify_signature(&envelope, digest, &keys);
        assert!(check.present);
        assert!(check.valid);
    }

    #[test]
    fn signature_fails_for_unknown_key_id() {
        let envelope = SignatureEnvelope {
            key_id: "missing".to_string(),
            signature_hex: "00".repeat(64),
            issuer: None,
        };
        let check = verify_signature(&envelope, "sha256:abc", &IssuerKeyTable::default());
        assert!(check.present);
        assert!(!check.valid);
    }
}
