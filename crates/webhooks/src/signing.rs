use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Same value as [`SIGNATURE_HEADER`], under the name GitHub-style receivers
/// look for.
pub const HUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const USER_AGENT: &str = concat!("switchboard-webhooks/", env!("CARGO_PKG_VERSION"));

const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex-encoded HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

/// Header value carried by every delivery: `sha256=<hex>`.
pub fn signature_header(secret: &str, payload: &[u8]) -> Result<String, WebhookError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign_payload(secret, payload)?))
}

/// Check a received signature header against the payload, in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(provided) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = sign_payload(secret, payload) else {
        return false;
    };
    expected
        .as_bytes()
        .ct_eq(provided.to_ascii_lowercase().as_bytes())
        .into()
}
