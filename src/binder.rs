use axum::http::HeaderMap;
use std::collections::HashMap;

use crate::error::AppError;
use crate::route_table::Route;

/// Builds the ordered, positional parameter list for a request: path variables first (in
/// `url_scheme` order), then either the whole query string as one JSON-object parameter or the
/// configured named query parameters, then — for `POST`/`PUT` with a JSON body — the raw body
/// text as a single trailing parameter.
///
/// Every parameter is `Option<String>`: nullable text. Non-text SQL columns need an explicit
/// cast in the `.sql` file (`$1::int`).
pub fn bind_request_params(
    route: &Route,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
    query_string_as_json: bool,
    query_param_names: &[String],
) -> Result<Vec<Option<String>>, AppError> {
    let mut params = Vec::new();

    for name in route.path_vars() {
        let value = path_values
            .get(&name)
            .ok_or_else(|| AppError::Bind(format!("missing path variable {name}")))?;
        params.push(Some(value.clone()));
    }

    if method.eq_ignore_ascii_case("GET") {
        if query_string_as_json {
            params.push(Some(query_string_to_json(raw_query)));
        } else {
            let query: HashMap<String, String> = parse_query_string(raw_query);
            for name in query_param_names {
                let value = query.get(name).filter(|v| !v.is_empty()).cloned();
                params.push(value);
            }
        }
    }

    if method.eq_ignore_ascii_case("POST") || method.eq_ignore_ascii_case("PUT") {
        let is_json = headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("application/json"))
            .unwrap_or(false);
        if is_json {
            let text = std::str::from_utf8(body)
                .map_err(|e| AppError::Bind(format!("request body is not valid utf8: {e}")))?;
            params.push(Some(text.to_string()));
        }
    }

    Ok(params)
}

/// Collapses a raw query string to a flat `{key: first-value}` map, matching `url.ParseQuery`
/// followed by `v[0]` in the Go original (repeated keys keep only the first value seen).
fn parse_query_string(raw_query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in raw_query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let key = urlencoding_decode(key);
        let value = urlencoding_decode(value);
        out.entry(key).or_insert(value);
    }
    out
}

fn query_string_to_json(raw_query: &str) -> String {
    let map = parse_query_string(raw_query);
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Recovers one positional parameter for the write-then-read chain's read-back query from a
/// path-variable name, taken directly off a previously-written row's JSON. Unlike a query
/// parameter, a path variable is passed through raw — a JSON string stays unquoted text rather
/// than being re-marshaled.
pub fn path_var_param(row: &serde_json::Value, name: &str) -> Option<String> {
    match row.get(name) {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Recovers one positional query-style parameter for the write-then-read chain, JSON-marshaling
/// whatever value is found (even a string, which therefore comes back quoted) — this mirrors
/// the Go original's `json.Marshal(v)` call in the read-back param loop, a quirk kept for
/// fidelity rather than smoothed over.
pub fn query_param_from_row(row: &serde_json::Value, name: &str) -> Option<String> {
    row.get(name)
        .map(|v| serde_json::to_string(v).unwrap_or_default())
}
