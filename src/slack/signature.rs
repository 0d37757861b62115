//! Slack request signing (`v0` HMAC-SHA256).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BotError;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are rejected as replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

fn mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, BotError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::SignatureVerification(format!("invalid signing key: {e}")))?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

/// Compute the `v0=<hex>` signature for a request.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, BotError> {
    let digest = mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("v0={}", hex::encode(digest)))
}

/// Check `X-Slack-Signature` against the body, rejecting stale timestamps.
///
/// `now` is the current Unix time in seconds.
pub fn verify(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> Result<(), BotError> {
    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| BotError::SignatureVerification(format!("bad timestamp '{timestamp}'")))?;
    if now.abs_diff(sent_at) > MAX_CLOCK_SKEW_SECS.unsigned_abs() {
        return Err(BotError::SignatureVerification("stale request timestamp".into()));
    }

    let provided = signature
        .strip_prefix("v0=")
        .and_then(|h| hex::decode(h).ok())
        .ok_or_else(|| BotError::SignatureVerification("malformed signature".into()))?;

    mac(secret, timestamp, body)?
        .verify_slice(&provided)
        .map_err(|_| BotError::SignatureVerification("signature mismatch".into()))
}
