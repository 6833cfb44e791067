use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use remb_core::{RembError, RembResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct AccessClaims {
    pub subject_id: String,
    pub exp: f64,
}

/// Decodes the payload segment of an access token without verifying the
/// signature. Every malformed input collapses into the same token error so
/// callers can treat "undecodable" as a single condition.
pub fn decode_access_token(token: &str) -> RembResult<AccessClaims> {
    decode_payload(token).ok_or_else(|| RembError::token("Invalid access token."))
}

fn decode_payload(token: &str) -> Option<AccessClaims> {
    let payload_b64 = token.split('.').nth(1)?;
    let padding = "=".repeat((4 - payload_b64.len() % 4) % 4);
    let decoded = URL_SAFE.decode(format!("{payload_b64}{padding}")).ok()?;
    let payload: Value = serde_json::from_slice(&decoded).ok()?;

    let exp = payload.get("exp")?.as_f64()?;
    let subject_id = payload
        .get("properties")?
        .get("idUser")?
        .as_str()?
        .to_string();

    Some(AccessClaims { subject_id, exp })
}
