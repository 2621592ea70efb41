/// Identity webhook signature verification.
///
/// Payloads are signed over `"{id}.{timestamp}.{body}"` with HMAC-SHA256. The
/// key is the base64 part of a `whsec_`-prefixed secret and the signature
/// header holds space-separated `v1,<base64>` entries.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{ChatError, ChatResult};

/// Accepted clock skew between the sender's timestamp and ours
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

const SECRET_PREFIX: &str = "whsec_";

pub const HEADER_ID: &str = "svix-id";
pub const HEADER_TIMESTAMP: &str = "svix-timestamp";
pub const HEADER_SIGNATURE: &str = "svix-signature";

/// The three signature headers of one delivery
#[derive(Debug, Clone, Copy)]
pub struct SignatureHeaders<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
}

fn invalid(reason: &str) -> ChatError {
    ChatError::InvalidWebhook(reason.to_string())
}

fn decode_secret(secret: &str) -> ChatResult<Vec<u8>> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    STANDARD
        .decode(encoded)
        .map_err(|_| invalid("Webhook secret is not valid base64"))
}

/// Compute the base64 signature of a payload
pub fn sign(secret: &str, id: &str, timestamp: &str, body: &[u8]) -> ChatResult<String> {
    let key = decode_secret(secret)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).map_err(|_| invalid("Invalid webhook secret"))?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a delivery as of `now` (seconds since the epoch)
pub fn verify(
    secret: &str,
    headers: SignatureHeaders<'_>,
    body: &[u8],
    now: i64,
) -> ChatResult<()> {
    let timestamp: i64 = headers
        .timestamp
        .trim()
        .parse()
        .map_err(|_| invalid("Invalid timestamp"))?;
    let within_tolerance = now
        .checked_sub(timestamp)
        .map(i64::unsigned_abs)
        .is_some_and(|skew| skew <= TIMESTAMP_TOLERANCE_SECS.unsigned_abs());
    if !within_tolerance {
        return Err(invalid("Timestamp outside tolerance window"));
    }

    let expected = sign(secret, headers.id, headers.timestamp.trim(), body)?;

    let matched = headers
        .signature
        .split_whitespace()
        .filter_map(|entry| entry.split_once(','))
        .filter(|(version, _)| *version == "v1")
        .any(|(_, candidate)| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(invalid("No matching signature"))
    }
}
