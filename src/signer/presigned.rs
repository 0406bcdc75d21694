//! Presigned URL construction.

use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Algorithm identifier embedded in the query string and string-to-sign.
pub const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of an empty body, the payload hash of a bodyless GET.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Everything outside the SigV4 unreserved set is percent-encoded with
/// uppercase hex; space becomes `%20`, never `+`.
const SIGV4_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// ISO-8601 basic, UTC, second precision.
const AMZ_DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// Signing failures are precondition violations, not runtime conditions:
/// a caller that hits one has constructed the parameters wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// A credential field is empty.
    #[error("missing credential field: {0}")]
    MissingCredentials(&'static str),

    /// A non-credential parameter is empty or out of range.
    #[error("invalid signing parameter: {0}")]
    InvalidParameter(String),
}

/// Inputs for one presigned URL. Consumed once per signing call; the
/// secret is zeroized on drop and never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PresignedUrlParams {
    /// HTTP method of the signed request, `GET` for a WebSocket handshake.
    pub method: String,
    /// Host (with optional port) the connection targets.
    pub host: String,
    /// Absolute request path.
    pub path: String,
    /// Signing service name, `transcribe` for streaming transcription.
    pub service: String,
    /// Hex SHA-256 of the request payload.
    pub payload_hash: String,
    /// AWS access key id.
    pub access_key_id: String,
    /// AWS secret access key. Never logged; zeroized on drop.
    pub secret_access_key: String,
    /// URL scheme of the output, `wss` for a secure WebSocket.
    pub protocol: String,
    /// Validity window of the signed URL in seconds.
    pub expires_in_secs: u64,
    /// Signing region.
    pub region: String,
    /// Extra caller query string as unencoded `k=v&k=v` pairs.
    pub query: String,
}

impl std::fmt::Debug for PresignedUrlParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresignedUrlParams")
            .field("method", &self.method)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("service", &self.service)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("expires_in_secs", &self.expires_in_secs)
            .field("region", &self.region)
            .field("query", &self.query)
            .finish()
    }
}

/// Presign a connection URL, timestamped now.
pub fn create_presigned_url(params: &PresignedUrlParams) -> Result<String, SignerError> {
    presign_at(params, OffsetDateTime::now_utc())
}

/// Presign a connection URL at an explicit instant.
///
/// Signing is deterministic for identical parameters and timestamp, which
/// is what makes signatures testable; production callers go through
/// [`create_presigned_url`].
pub fn presign_at(
    params: &PresignedUrlParams,
    at: OffsetDateTime,
) -> Result<String, SignerError> {
    validate(params)?;

    let timestamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(&AMZ_DATE_FORMAT)
        .map_err(|e| SignerError::InvalidParameter(format!("timestamp: {e}")))?;
    let date = &timestamp[..8];
    let scope = format!(
        "{date}/{}/{}/aws4_request",
        params.region, params.service
    );

    let mut pairs: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".to_string(), SIGNING_ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{scope}", params.access_key_id),
        ),
        ("X-Amz-Date".to_string(), timestamp.clone()),
        ("X-Amz-Expires".to_string(), params.expires_in_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    pairs.extend(parse_query(&params.query));

    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();
    let canonical_query = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = [
        params.method.as_str(),
        params.path.as_str(),
        canonical_query.as_str(),
        &format!("host:{}\n", params.host),
        "host",
        params.payload_hash.as_str(),
    ]
    .join("\n");

    let string_to_sign = format!(
        "{SIGNING_ALGORITHM}\n{timestamp}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &params.secret_access_key,
        date,
        &params.region,
        &params.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    Ok(format!(
        "{}://{}{}?{canonical_query}&X-Amz-Signature={signature}",
        params.protocol, params.host, params.path
    ))
}

fn validate(params: &PresignedUrlParams) -> Result<(), SignerError> {
    if params.access_key_id.is_empty() {
        return Err(SignerError::MissingCredentials("access key id"));
    }
    if params.secret_access_key.is_empty() {
        return Err(SignerError::MissingCredentials("secret access key"));
    }
    if params.host.is_empty() {
        return Err(SignerError::InvalidParameter("host is empty".to_string()));
    }
    if params.path.is_empty() || !params.path.starts_with('/') {
        return Err(SignerError::InvalidParameter(format!(
            "path '{}' must be absolute",
            params.path
        )));
    }
    if params.expires_in_secs == 0 {
        return Err(SignerError::InvalidParameter(
            "expiry window must be at least one second".to_string(),
        ));
    }
    Ok(())
}

/// Split a raw `k=v&k=v` string into decoded pairs; every pair is
/// re-encoded canonically before signing.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, SIGV4_ENCODE_SET).to_string()
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The fixed HMAC chain: secret -> date -> region -> service -> terminator.
fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let seed = format!("AWS4{secret}");
    let k_date = hmac_sha256(seed.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
