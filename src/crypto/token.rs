//! Sealed claim tokens.
//!
//! A token is `<payload>.<mac>`: the base64url JSON claim and an HMAC-SHA256
//! over the payload keyed by the runtime signing key followed by the subject's
//! current secret. Rotating the secret makes every older token fail to open.

use crate::domain::auth::Claim;
use crate::domain::error::{RuntimeError, RuntimeResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn mac(signing_key: &[u8], secret: &str, payload: &str) -> RuntimeResult<Vec<u8>> {
    let mut key = Vec::with_capacity(signing_key.len() + secret.len());
    key.extend_from_slice(signing_key);
    key.extend_from_slice(secret.as_bytes());
    let mut m = HmacSha256::new_from_slice(&key)
        .map_err(|e| RuntimeError::Storage(anyhow::anyhow!("invalid MAC key: {e}")))?;
    m.update(payload.as_bytes());
    Ok(m.finalize().into_bytes().to_vec())
}

fn split(token: &str) -> RuntimeResult<(&str, &str)> {
    token
        .split_once('.')
        .ok_or_else(|| RuntimeError::Unauthorized("malformed token".into()))
}

pub fn seal(claim: &Claim, signing_key: &[u8], secret: &str) -> RuntimeResult<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claim)?);
    let tag = mac(signing_key, secret, &payload)?;
    Ok(format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(tag)))
}

/// Decodes the claim without checking the MAC.
///
/// Only for finding out whose secret to verify against.
pub fn peek(token: &str) -> RuntimeResult<Claim> {
    let (payload, _) = split(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| RuntimeError::Unauthorized("malformed token".into()))?;
    serde_json::from_slice(&bytes).map_err(|_| RuntimeError::Unauthorized("malformed token".into()))
}

/// Verifies the MAC against `secret` and the expiry against `now`.
pub fn open(token: &str, signing_key: &[u8], secret: &str, now: DateTime<Utc>) -> RuntimeResult<Claim> {
    let (payload, tag) = split(token)?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag)
        .map_err(|_| RuntimeError::Unauthorized("malformed token".into()))?;
    let expected = mac(signing_key, secret, payload)?;
    if !bool::from(expected.ct_eq(&tag)) {
        return Err(RuntimeError::Unauthorized("token signature mismatch".into()));
    }
    let claim = peek(token)?;
    if claim.expired_at(now) {
        return Err(RuntimeError::Unauthorized(format!(
            "token for {} expired at {}",
            claim.subject, claim.expires_at
        )));
    }
    Ok(claim)
}
