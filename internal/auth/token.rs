use crate::util::http::constant_time_eq;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::BTreeMap;

/// Reserved claim key carrying the hex HMAC over the rest of the claim.
const SIGNATURE_KEY: &str = "signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Malformed,
    BadSignature,
    ProjectMismatch,
    Expired,
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "authorization token missing",
            AuthError::Malformed => "authorization token malformed",
            AuthError::BadSignature => "authorization token signature mismatch",
            AuthError::ProjectMismatch => "authorization token bound to another project",
            AuthError::Expired => "authorization token expired",
        }
    }
}

/// Stateless server-verifiable capability tokens: a signed
/// `{project, expires_at}` claim lets the broker validate a later verify
/// callback without persisting any issued-token table.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenAuthenticator {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, project: &str) -> String {
        self.issue_at(project, Utc::now())
    }

    fn issue_at(&self, project: &str, now: DateTime<Utc>) -> String {
        let expires_at = (now + self.ttl).timestamp();
        let signature = self.signature_for(project, expires_at);
        let mut claim = BTreeMap::new();
        claim.insert("expires_at", json!(expires_at));
        claim.insert("project", json!(project));
        claim.insert(SIGNATURE_KEY, json!(signature));
        let body = serde_json::to_string(&claim).expect("serialize claim");
        Base64.encode(body.as_bytes())
    }

    pub fn verify(&self, token: &str, expected_project: &str) -> Result<(), AuthError> {
        self.verify_at(token, expected_project, Utc::now())
    }

    fn verify_at(
        &self,
        token: &str,
        expected_project: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let raw = Base64.decode(token).map_err(|_| AuthError::Malformed)?;
        let parsed: Value = serde_json::from_slice(&raw).map_err(|_| AuthError::Malformed)?;
        let Value::Object(mut claim) = parsed else {
            return Err(AuthError::Malformed);
        };
        let signature = claim
            .remove(SIGNATURE_KEY)
            .and_then(|value| value.as_str().map(|sig| sig.to_string()))
            .ok_or(AuthError::Malformed)?;

        let canonical = canonical_claim(&claim);
        let expected = self.sign_hex(canonical.as_bytes());
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(AuthError::BadSignature);
        }

        let project = claim.get("project").and_then(Value::as_str);
        if project != Some(expected_project) {
            return Err(AuthError::ProjectMismatch);
        }
        let expires_at = claim
            .get("expires_at")
            .and_then(Value::as_i64)
            .ok_or(AuthError::Malformed)?;
        if now.timestamp() >= expires_at {
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    fn signature_for(&self, project: &str, expires_at: i64) -> String {
        let mut claim = serde_json::Map::new();
        claim.insert("expires_at".to_string(), json!(expires_at));
        claim.insert("project".to_string(), json!(project));
        self.sign_hex(canonical_claim(&claim).as_bytes())
    }

    fn sign_hex(&self, message: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Canonical claim bytes: JSON with lexicographically sorted keys. The
/// signature is only valid for this exact byte sequence.
fn canonical_claim(claim: &serde_json::Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = claim.iter().collect();
    serde_json::to_string(&sorted).expect("serialize claim")
}
