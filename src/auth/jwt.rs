//! Unverified JWT inspection
//!
//! Signatures are never verified here; the API gateway does that. Only the
//! expiry and scopes are read, to schedule refreshes and pick endpoints.

use crate::error::{ConnectorError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};

/// Claims the connector cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub exp: DateTime<Utc>,
    pub iat: Option<DateTime<Utc>>,
    pub sub: Option<String>,
    /// Space-separated `scope` claim split into entries; `None` when absent
    pub scopes: Option<Vec<String>>,
}

fn decode_segment(segment: &str, name: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    // Some issuers pad their segments
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('='))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        ConnectorError::malformed_token(format!("{} is not valid JSON: {}", name, e))
    })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(ConnectorError::malformed_token(format!(
            "{} is not a JSON object",
            name
        ))),
    }
}

fn timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let secs = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Decode header and payload without verifying the signature and read `exp`
pub fn decode_unverified_for_expiry(token: &str) -> Result<TokenClaims> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(ConnectorError::malformed_token(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    let header = decode_segment(parts[0], "header")?;
    if !header.get("alg").is_some_and(|v| v.is_string()) {
        return Err(ConnectorError::malformed_token("header has no alg"));
    }

    let payload = decode_segment(parts[1], "payload")?;
    let exp = payload
        .get("exp")
        .and_then(timestamp)
        .ok_or_else(|| ConnectorError::malformed_token("payload has no numeric exp"))?;

    let scopes = match payload.get("scope") {
        Some(serde_json::Value::String(s)) => Some(s.split_whitespace().map(str::to_string).collect()),
        Some(serde_json::Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    };

    Ok(TokenClaims {
        exp,
        iat: payload.get("iat").and_then(timestamp),
        sub: payload
            .get("sub")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        scopes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json)
    }

    #[test]
    fn reads_exp_and_scopes() {
        let token = format!(
            "{}.{}.sig",
            encode(r#"{"alg":"RS256","typ":"JWT"}"#),
            encode(r#"{"sub":"u1","exp":2000000000,"iat":1999990000,"scope":"openid conve:odometer_status"}"#)
        );
        let claims = decode_unverified_for_expiry(&token).unwrap();
        assert_eq!(claims.exp.timestamp(), 2_000_000_000);
        assert_eq!(claims.iat.map(|t| t.timestamp()), Some(1_999_990_000));
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(
            claims.scopes,
            Some(vec!["openid".to_string(), "conve:odometer_status".to_string()])
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        let header = encode(r#"{"alg":"RS256"}"#);
        let cases = [
            "not-a-jwt".to_string(),
            format!("{}.{}", header, encode(r#"{"exp":1}"#)),
            format!("{}.!!!.sig", header),
            format!("{}.{}.sig", encode(r#"{"typ":"JWT"}"#), encode(r#"{"exp":1}"#)),
            format!("{}.{}.sig", header, encode(r#"[1,2]"#)),
            format!("{}.{}.sig", header, encode(r#"{"exp":"soon"}"#)),
        ];
        for token in cases {
            let err = decode_unverified_for_expiry(&token).unwrap_err();
            assert!(
                matches!(err, ConnectorError::MalformedToken { .. }),
                "{token}: {err}"
            );
        }
    }
}
