//! Webhook secret check.
//!
//! The assistant platform signs every webhook call with the shared secret as
//! an HS256 JWT in the `Authorization` header (with or without `Bearer `).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use kbridge_core::{BridgeError, Result};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
struct Header {
    alg: String,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

fn denied(reason: impl Into<String>) -> BridgeError {
    BridgeError::AuthFailed(reason.into())
}

/// Verify an `Authorization` header value against `secret` at unix time `now`.
pub fn verify_jwt(header: Option<&str>, secret: Option<&str>, now: i64) -> Result<()> {
    let secret = secret.ok_or_else(|| denied("no webhook secret configured"))?;
    let header = header.ok_or_else(|| denied("missing Authorization header"))?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(denied("token is not a JWT"));
    };

    let jwt_header: Header = decode_segment(header_b64)?;
    if jwt_header.alg != "HS256" {
        return Err(denied(format!("unsupported JWT algorithm {}", jwt_header.alg)));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| denied("JWT signature is not base64url"))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| denied("invalid HMAC key length"))?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| denied("JWT signature mismatch"))?;

    let claims: Claims = decode_segment(claims_b64)?;
    match claims.exp {
        Some(exp) if exp <= now => Err(denied("JWT expired")),
        _ => Ok(()),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| denied("JWT segment is not base64url"))?;
    serde_json::from_slice(&bytes).map_err(|e| denied(format!("JWT segment is not JSON: {e}")))
}

/// Build an HS256 token, the way the assistant platform does.
#[cfg(test)]
pub(crate) fn sign_jwt(claims: &serde_json::Value, secret: &str) -> String {
    let header = serde_json::json!({"alg": "HS256", "typ": "JWT"});
    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
    let claims_b64 = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    let message = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(message.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{message}.{sig_b64}")
}
