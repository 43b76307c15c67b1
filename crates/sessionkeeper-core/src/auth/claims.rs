//! JWT claim decoding.
//!
//! Only the payload segment is read. Signatures are the server's business;
//! the client just needs `exp` to know when the session ends.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<serde_json::Value>,
    /// Expiry, seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not three dot-separated segments")]
    Malformed,

    #[error("payload is not valid base64url")]
    Base64,

    #[error("payload is not a JSON object: {0}")]
    Json(String),
}

/// Decode the payload of a JWT, reporting why it could not be read.
pub fn parse_claims(token: &str) -> Result<Claims, DecodeError> {
    let mut segments = token.trim().split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(DecodeError::Malformed);
    };
    if header.is_empty() || payload.is_empty() {
        return Err(DecodeError::Malformed);
    }

    // Some issuers pad the segments even though RFC 7515 says not to
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| DecodeError::Base64)?;

    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))
}

/// Decode the payload of a JWT. Any malformed input yields `None`.
pub fn decode_claims(token: &str) -> Option<Claims> {
    parse_claims(token).ok()
}
