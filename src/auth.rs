//! AWS Signature Version 4 request authentication.
//!
//! Validates the `Authorization` header against the configured credential
//! map by recomputing the canonical request, string-to-sign, and signature.
//! Verification only looks at the request head, so it always completes
//! before the body is read and before any side effect can occur.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::credentials::CredentialStore;
use crate::error::SandbarError;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string, used when no `x-amz-content-sha256` header
/// is present (unsigned-body GET/DELETE requests).
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Maximum tolerated difference between `x-amz-date` and server time.
const MAX_CLOCK_SKEW_SECONDS: i64 = 15 * 60;

/// Verification result for a signed request.
#[derive(Debug)]
pub struct VerifiedRequest {
    pub access_key_id: String,
}

/// Components of a parsed `Authorization: AWS4-HMAC-SHA256 ...` header.
#[derive(Debug)]
struct ParsedAuthorization {
    access_key_id: String,
    date: String,
    region: String,
    service: String,
    signed_headers: Vec<String>,
    signature: String,
}

/// Verify the AWS SigV4 signature on a request head.
///
/// `now` is passed in rather than read from the clock so callers (and
/// tests) control the skew window.
pub fn verify_sigv4(
    parts: &http::request::Parts,
    credentials: &CredentialStore,
    now: DateTime<Utc>,
) -> Result<VerifiedRequest, SandbarError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or(SandbarError::MissingAuthorization)?;

    let parsed = parse_authorization_header(auth_header)?;

    debug!(
        access_key = %parsed.access_key_id,
        signed_headers = ?parsed.signed_headers,
        "Verifying request signature"
    );

    // Request timestamp, checked against the skew window before any
    // expensive work.
    let timestamp_str = parts
        .headers
        .get("x-amz-date")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            SandbarError::MalformedAuthorization("Missing x-amz-date header".to_string())
        })?;
    let timestamp = chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y%m%dT%H%M%SZ")
        .map_err(|e| {
            SandbarError::MalformedAuthorization(format!("Invalid x-amz-date format: {}", e))
        })?
        .and_utc();

    let skew = (now - timestamp).num_seconds().abs();
    if skew > MAX_CLOCK_SKEW_SECONDS {
        warn!(
            access_key = %parsed.access_key_id,
            skew_seconds = skew,
            "Request timestamp outside the allowed skew window"
        );
        return Err(SandbarError::RequestTimeTooSkewed);
    }

    let secret_key = credentials
        .get_secret_key(&parsed.access_key_id)
        .ok_or_else(|| SandbarError::InvalidAccessKeyId(parsed.access_key_id.clone()))?;

    // The literal x-amz-content-sha256 value stands in for a server-side
    // body hash; streaming clients send UNSIGNED-PAYLOAD or a chunked
    // marker here and the signature covers the header either way.
    let payload_hash = parts
        .headers
        .get("x-amz-content-sha256")
        .and_then(|h| h.to_str().ok())
        .unwrap_or(EMPTY_PAYLOAD_SHA256);

    let canonical_request = build_canonical_request(parts, &parsed.signed_headers, payload_hash);
    let canonical_request_hash = hex_encode(&Sha256::digest(canonical_request.as_bytes()));

    let string_to_sign = compute_string_to_sign(
        &timestamp,
        &parsed.date,
        &parsed.region,
        &parsed.service,
        &canonical_request_hash,
    );

    let signing_key = derive_signing_key(secret_key, &parsed.date, &parsed.region, &parsed.service);
    let expected_signature = hex_encode(&hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    if expected_signature != parsed.signature {
        debug!(
            expected = %expected_signature,
            provided = %parsed.signature,
            "Signature comparison failed"
        );
        return Err(SandbarError::SignatureMismatch);
    }

    Ok(VerifiedRequest {
        access_key_id: parsed.access_key_id,
    })
}

/// Parse the Authorization header.
/// Format: `AWS4-HMAC-SHA256 Credential=KEY/DATE/REGION/SERVICE/aws4_request, SignedHeaders=..., Signature=...`
fn parse_authorization_header(auth_header: &str) -> Result<ParsedAuthorization, SandbarError> {
    if !auth_header.starts_with("AWS4-HMAC-SHA256") {
        return Err(SandbarError::MalformedAuthorization(
            "Unsupported authorization scheme".to_string(),
        ));
    }

    let credential = auth_header
        .split("Credential=")
        .nth(1)
        .and_then(|s| s.split(',').next())
        .ok_or_else(|| {
            SandbarError::MalformedAuthorization(
                "Missing Credential in Authorization header".to_string(),
            )
        })?;

    let scope: Vec<&str> = credential.split('/').collect();
    if scope.len() != 5 || scope[4] != "aws4_request" {
        return Err(SandbarError::MalformedAuthorization(
            "Invalid Credential scope".to_string(),
        ));
    }

    let signed_headers_str = auth_header
        .split("SignedHeaders=")
        .nth(1)
        .and_then(|s| s.split(',').next())
        .ok_or_else(|| {
            SandbarError::MalformedAuthorization(
                "Missing SignedHeaders in Authorization header".to_string(),
            )
        })?;
    let signed_headers: Vec<String> = signed_headers_str
        .trim()
        .split(';')
        .map(|s| s.to_ascii_lowercase())
        .collect();

    let signature = auth_header
        .split("Signature=")
        .nth(1)
        .ok_or_else(|| {
            SandbarError::MalformedAuthorization(
                "Missing Signature in Authorization header".to_string(),
            )
        })?
        .trim()
        .to_string();

    Ok(ParsedAuthorization {
        access_key_id: scope[0].to_string(),
        date: scope[1].to_string(),
        region: scope[2].to_string(),
        service: scope[3].to_string(),
        signed_headers,
        signature,
    })
}

/// Build the canonical request string.
fn build_canonical_request(
    parts: &http::request::Parts,
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let mut canonical = String::new();

    canonical.push_str(parts.method.as_str());
    canonical.push('\n');

    // Canonical URI (S3-specific: the path is not double-encoded)
    canonical.push_str(parts.uri.path());
    canonical.push('\n');

    // Canonical query string, sorted by parameter
    if let Some(query) = parts.uri.query() {
        let mut params: Vec<&str> = query.split('&').collect();
        params.sort_unstable();
        canonical.push_str(&params.join("&"));
    }
    canonical.push('\n');

    // Canonical headers: only those listed in SignedHeaders, in order
    for header_name in signed_headers {
        if let Some(header_value) = parts.headers.get(header_name) {
            canonical.push_str(header_name);
            canonical.push(':');
            if let Ok(value_str) = header_value.to_str() {
                canonical.push_str(value_str.trim());
            }
            canonical.push('\n');
        }
    }
    canonical.push('\n');

    canonical.push_str(&signed_headers.join(";"));
    canonical.push('\n');

    canonical.push_str(payload_hash);

    canonical
}

fn compute_string_to_sign(
    timestamp: &DateTime<Utc>,
    scope_date: &str,
    region: &str,
    service: &str,
    canonical_request_hash: &str,
) -> String {
    format!(
        "AWS4-HMAC-SHA256\n{}\n{}/{}/{}/aws4_request\n{}",
        timestamp.format("%Y%m%dT%H%M%SZ"),
        scope_date,
        region,
        service,
        canonical_request_hash
    )
}

/// Derive the signing key: HMAC chain over date, region, service, and the
/// terminal "aws4_request" literal, seeded with "AWS4" + secret.
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}
