//! Webhook signature helpers and body hashing.
//!
//! NOWPayments signs IPN callbacks with HMAC over the JSON body; Stripe
//! signs `"{timestamp}.{body}"` and sends the result in `Stripe-Signature`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Seconds a Stripe signature stays valid around its timestamp.
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("signature mismatch")]
    Mismatch,

    #[error("signature timestamp outside tolerance")]
    Expired,
}

/// Hex SHA-256 of a raw body, used as the webhook dedup key.
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn hmac_sha512_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a computed hex digest with a received one.
pub fn hex_eq(expected: &str, received: &str) -> bool {
    let received = received.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

// ─────────────────────────────────────────────────────────────────────────────
// NOWPayments IPN
// ─────────────────────────────────────────────────────────────────────────────

/// How NOWPayments IPN signatures are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpnScheme {
    /// HMAC-SHA512 over the JSON body re-serialised with sorted keys
    #[default]
    Sha512Sorted,
    /// HMAC-SHA256 over the raw body bytes
    Sha256Raw,
}

impl IpnScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpnScheme::Sha512Sorted => "sha512-sorted",
            IpnScheme::Sha256Raw => "sha256-raw",
        }
    }
}

impl std::str::FromStr for IpnScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha512-sorted" | "sha512" => Ok(IpnScheme::Sha512Sorted),
            "sha256-raw" | "sha256" => Ok(IpnScheme::Sha256Raw),
            other => Err(format!("unknown IPN signature scheme: {}", other)),
        }
    }
}

/// Re-serialises a JSON document with object keys sorted at every level.
///
/// `serde_json::Map` is ordered by key unless `preserve_order` is enabled.
pub fn sorted_json(body: &[u8]) -> Result<String, SignatureError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| SignatureError::Malformed(e.to_string()))
}

pub fn sign_ipn(scheme: IpnScheme, secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    match scheme {
        IpnScheme::Sha512Sorted => Ok(hmac_sha512_hex(secret, sorted_json(body)?.as_bytes())),
        IpnScheme::Sha256Raw => Ok(hmac_sha256_hex(secret, body)),
    }
}

pub fn verify_ipn(
    scheme: IpnScheme,
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;
    let expected = sign_ipn(scheme, secret, body)?;
    if hex_eq(&expected, signature) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stripe
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignature {
    pub timestamp: i64,
    pub v1: Vec<String>,
}

impl std::str::FromStr for StripeSignature {
    type Err = SignatureError;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let mut timestamp = None;
        let mut v1 = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    let t = value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed("bad timestamp".into()))?;
                    timestamp = Some(t);
                }
                "v1" => v1.push(value.to_string()),
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed("no t=".into()))?;
        if v1.is_empty() {
            return Err(SignatureError::Malformed("no v1 signature".into()));
        }
        Ok(Self { timestamp, v1 })
    }
}

/// Builds a `Stripe-Signature` header value for `body` at `timestamp`.
pub fn sign_stripe(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("t={},v1={}", timestamp, stripe_digest(secret, timestamp, body))
}

fn stripe_digest(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut payload = format!("{}.", timestamp).into_bytes();
    payload.extend_from_slice(body);
    hmac_sha256_hex(secret, &payload)
}

/// Checks a `Stripe-Signature` header against `body` at time `now`.
pub fn verify_stripe(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let header: StripeSignature = header.ok_or(SignatureError::Missing)?.parse()?;
    let expected = stripe_digest(secret, header.timestamp, body);
    if !header.v1.iter().any(|candidate| hex_eq(&expected, candidate)) {
        return Err(SignatureError::Mismatch);
    }
    if (now - header.timestamp).abs() > STRIPE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_hash_is_sha256_hex() {
        assert_eq!(
            body_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn known_hmac_vectors() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_sha256_hex("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(
            hmac_sha512_hex("Jefe", b"what do ya want for nothing?"),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn sorted_json_sorts_nested_keys() {
        let body = br#"{"b":1,"a":{"z":true,"c":null},"m":[{"y":1,"x":2}]}"#;
        assert_eq!(
            sorted_json(body).unwrap(),
            r#"{"a":{"c":null,"z":true},"b":1,"m":[{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn ipn_signature_ignores_key_order() {
        let secret = "ipn_secret";
        let signed = br#"{"payout_id":"5001","status":"finished"}"#;
        let reordered = br#"{ "status": "finished", "payout_id": "5001" }"#;

        let signature = sign_ipn(IpnScheme::Sha512Sorted, secret, signed).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify_ipn(IpnScheme::Sha512Sorted, secret, reordered, Some(&signature)).is_ok());
        assert_eq!(
            verify_ipn(IpnScheme::Sha256Raw, secret, reordered, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn ipn_raw_scheme_and_missing_header() {
        let body = br#"{"status":"finished"}"#;
        let signature = sign_ipn(IpnScheme::Sha256Raw, "s", body).unwrap();
        assert!(verify_ipn(IpnScheme::Sha256Raw, "s", body, Some(&signature.to_uppercase())).is_ok());
        assert_eq!(
            verify_ipn(IpnScheme::Sha256Raw, "s", body, None),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_ipn(IpnScheme::Sha256Raw, "other", body, Some(&signature)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn sorted_scheme_rejects_non_json() {
        assert!(matches!(
            sign_ipn(IpnScheme::Sha512Sorted, "s", b"not json"),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn scheme_parses() {
        assert_eq!("sha256-raw".parse::<IpnScheme>().unwrap(), IpnScheme::Sha256Raw);
        assert_eq!("SHA512".parse::<IpnScheme>().unwrap(), IpnScheme::Sha512Sorted);
        assert!("md5".parse::<IpnScheme>().is_err());
    }

    #[test]
    fn stripe_header_parsing() {
        let header: StripeSignature = "t=1700000000,v1=abc,v0=old,v1=def".parse().unwrap();
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.v1, vec!["abc".to_string(), "def".to_string()]);

        assert!("v1=abc".parse::<StripeSignature>().is_err());
        assert!("t=1700000000".parse::<StripeSignature>().is_err());
        assert!("t=soon,v1=abc".parse::<StripeSignature>().is_err());
    }

    #[test]
    fn stripe_signature_round_trip_and_tolerance() {
        let secret = "whsec_test";
        let body = br#"{"type":"payout.paid"}"#;
        let t = 1_700_000_000;
        let header = sign_stripe(secret, t, body);

        assert!(verify_stripe(secret, Some(&header), body, t + 10).is_ok());
        assert_eq!(
            verify_stripe(secret, Some(&header), body, t + STRIPE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_stripe(secret, Some(&header), b"{}", t),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_stripe(secret, None, body, t),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn stripe_accepts_any_matching_v1() {
        let secret = "whsec_test";
        let body = b"{}";
        let good = sign_stripe(secret, 42, body);
        let header = format!("t=42,v1=deadbeef,{}", good.trim_start_matches("t=42,"));
        assert!(verify_stripe(secret, Some(&header), body, 42).is_ok());
    }
}
