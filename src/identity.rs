use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::HashMap;

use crate::config::AppUserAuth;
use crate::error::AppError;

/// Recovers `app_user.auth` from the incoming request, per `AppUserAuth`. Deliberately does NOT
/// verify any JWT signature — only the payload segment is base64url-decoded. A missing
/// header/cookie yields `IdentityMissing`; a present-but-malformed JWT (wrong segment count, bad
/// base64, bad JSON, or a non-string claim value) yields `IdentityMalformed`.
pub fn extract_auth(
    config: &AppUserAuth,
    headers: &HeaderMap,
    cookies: &HashMap<String, String>,
) -> Result<String, AppError> {
    match config.parse_from.as_str() {
        "Header" => extract_from_header(config, headers),
        "Cookie" => extract_from_cookie(config, cookies),
        _ => Ok(String::new()),
    }
}

fn extract_from_header(config: &AppUserAuth, headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(&config.field)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if config.r#type != "JWT" {
        return Ok(raw);
    }
    // "Bearer <token>" or a bare token: only the last whitespace-separated segment is used.
    let token = raw.rsplit(' ').next().unwrap_or("").to_string();
    decode_jwt(config, &token, &raw)
}

fn extract_from_cookie(
    config: &AppUserAuth,
    cookies: &HashMap<String, String>,
) -> Result<String, AppError> {
    if config.name.is_empty() {
        return Ok(cookies_as_json(cookies));
    }
    let raw = cookies
        .get(&config.name)
        .ok_or_else(|| AppError::IdentityMissing(format!("cookie {} not present", config.name)))?
        .clone();
    if config.r#type != "JWT" {
        return Ok(raw);
    }
    decode_jwt(config, &raw, &raw)
}

/// Decodes `token`'s payload segment. `fallback` is the original, pre-decode raw header/cookie
/// value: when `Claim` is configured but absent from the decoded payload, the original
/// `GetAppUserAuth` leaves its `result` variable untouched rather than clearing it, so a missing
/// claim key yields the raw value back, not an empty string.
fn decode_jwt(config: &AppUserAuth, token: &str, fallback: &str) -> Result<String, AppError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AppError::IdentityMalformed(format!(
            "invalid JWT format, expected 3 segments, found {}",
            segments.len()
        )));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| AppError::IdentityMalformed(format!("invalid JWT payload base64: {e}")))?;

    if config.claim.is_empty() {
        return Ok(String::from_utf8(payload)
            .map_err(|e| AppError::IdentityMalformed(format!("invalid JWT payload utf8: {e}")))?);
    }

    let mapped: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&payload)
        .map_err(|e| AppError::IdentityMalformed(format!("invalid JWT payload json: {e}")))?;
    match mapped.get(&config.claim) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(AppError::IdentityMalformed(format!(
            "claim {} is not a string",
            config.claim
        ))),
        None => Ok(fallback.to_string()),
    }
}

/// Marshals the full cookie jar to a JSON object, used both as the "whole jar" identity
/// (`AppUserAuth.Name == ""`) and unconditionally as `app_user.cookies` (`SetLocalParams`
/// installs it regardless of which `ParseFrom` mode is active).
pub fn cookies_as_json(cookies: &HashMap<String, String>) -> String {
    serde_json::to_string(cookies).unwrap_or_else(|_| "{}".to_string())
}

pub fn parse_cookie_header(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for value in headers.get_all(axum::http::header::COOKIE) {
        let Ok(s) = value.to_str() else { continue };
        for pair in s.split(';') {
            let pair = pair.trim();
            if let Some((name, value)) = pair.split_once('=') {
                out.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    out
}
