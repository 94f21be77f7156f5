//! ES256 provider tokens for APNs.
//!
//! Tokens are assembled by hand rather than through a JWT library so the
//! signature is the ASN.1 DER `{r, s}` form and the issued-at quantization is
//! explicit. Signing is deterministic (RFC 6979), so every process holding
//! the same key produces byte-identical tokens for the same half-hour bucket.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde::Serialize;

use super::client::ApnsError;

#[derive(Serialize)]
struct JwtHeader<'a> {
    alg: &'static str,
    kid: &'a str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    iat: i64,
}

/// Parse a PKCS#8 PEM ECDSA P-256 signing key (the `.p8` file Apple issues).
pub fn load_signing_key(pem: &str) -> Result<SigningKey, ApnsError> {
    SigningKey::from_pkcs8_pem(pem).map_err(|e| ApnsError::SigningKey(e.to_string()))
}

/// Build a provider token: `base64url(header).base64url(claims).base64url(sig)`.
pub fn create_jwt(
    key: &SigningKey,
    kid: &str,
    team_id: &str,
    issued_at: i64,
) -> Result<String, ApnsError> {
    let header = serde_json::to_vec(&JwtHeader { alg: "ES256", kid })?;
    let claims = serde_json::to_vec(&JwtClaims { iss: team_id, iat: issued_at })?;

    let mut token = String::with_capacity(256);
    token.push_str(&URL_SAFE_NO_PAD.encode(header));
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(claims));

    let signature: Signature = key.sign(token.as_bytes());
    token.push('.');
    token.push_str(&URL_SAFE_NO_PAD.encode(signature.to_der().as_bytes()));

    Ok(token)
}

/// Quantize `now` to the nearest half-hour bucket, offset 10 minutes into the
/// past, so every process in a fleet presents the same token at the same
/// wall-clock instant. Apple rate-limits token rotation to once per 20
/// minutes; the half-hour bucket stays within that.
pub fn quantized_issued_at(now: i64) -> i64 {
    ((now - 600) / 1800) * 1800
}
