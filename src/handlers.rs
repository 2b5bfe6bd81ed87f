use std::collections::HashMap;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::query_param_names;
use crate::db;
use crate::error::AppError;
use crate::identity;
use crate::route_table::Route;
use crate::sql_artifacts;
use crate::AppState;

fn principal_and_cookies(state: &AppState, headers: &HeaderMap) -> Result<(String, String), AppError> {
    let cookies = identity::parse_cookie_header(headers);
    let principal = identity::extract_auth(&state.config.app_user_auth, headers, &cookies)?;
    let cookies_json = identity::cookies_as_json(&cookies);
    Ok((principal, cookies_json))
}

/// Authorize middleware: runs the authorize SQL in its own short-lived transaction, distinct
/// from the work transaction a handler opens afterward. A missing authorize-SQL file is
/// `ArtifactMissing` → 500; there is no fallback to "no check configured, allow".
async fn authorize(
    state: &AppState,
    route: &Route,
    request_kind: &str,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AppError> {
    let names = query_param_names(route);
    let params = crate::binder::bind_request_params(
        route,
        method,
        path_values,
        raw_query,
        headers,
        body,
        state.config.query_string_as_json,
        &names,
    )?;
    let auth_path = sql_artifacts::authorize_path(&state.config.sql_root, request_kind, &route.name)?;
    let sql = sql_artifacts::read(&auth_path)?;
    let (principal, cookies_json) = principal_and_cookies(state, headers)?;
    let timeout = state.query_timeout();

    let mut tx = db::begin(&state.pool).await?;
    db::install_locals(&mut tx, &state.config, &principal, &cookies_json, timeout).await?;
    let authorized = db::fetch_bool(&mut tx, &sql, &params, timeout).await?;
    tx.commit().await?;

    if authorized {
        Ok(())
    } else {
        Err(AppError::AuthDenied)
    }
}

/// `read`-route handler.
pub async fn run_query(
    state: &AppState,
    route: &Route,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    match run_query_inner(state, route, path_values, raw_query, headers, body).await {
        Ok(resp) => resp,
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

async fn run_query_inner(
    state: &AppState,
    route: &Route,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    authorize(state, route, "select", "GET", path_values, raw_query, headers, body).await?;

    let names = query_param_names(route);
    let params = crate::binder::bind_request_params(
        route,
        "GET",
        path_values,
        raw_query,
        headers,
        body,
        state.config.query_string_as_json,
        &names,
    )?;
    let (principal, cookies_json) = principal_and_cookies(state, headers)?;
    let timeout = state.query_timeout();

    let select_path = sql_artifacts::select_path(&state.config.sql_root, &route.name)?;
    let sql = sql_artifacts::read(&select_path)?;

    let mut tx = db::begin(&state.pool).await?;
    db::install_locals(&mut tx, &state.config, &principal, &cookies_json, timeout).await?;
    let bytes = db::fetch_single_json(&mut tx, &sql, &params, timeout).await?;
    tx.commit().await?;

    Ok(match bytes {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(ref b) if b.is_empty() => json_response(StatusCode::OK, b"[]".to_vec()),
        Some(b) => json_response(StatusCode::OK, b),
    })
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [("content-type", "application/json")], body).into_response()
}

fn verb_for_method(method: &str) -> Result<&'static str, AppError> {
    match method {
        "POST" => Ok("insert"),
        "PUT" => Ok("update"),
        "DELETE" => Ok("delete"),
        _ => Err(AppError::MethodNotAllowed),
    }
}

/// `create`/`update`/`delete`-route handler and write-then-read chain. `sibling_read` is the
/// `read`-type route sharing this route's name, captured once at router-build time — route-table
/// lookups don't happen per request, since the sibling was already resolved when this handler
/// closure was built.
pub async fn run_exec(
    state: &AppState,
    route: &Route,
    sibling_read: Option<&Route>,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    match run_exec_inner(state, route, sibling_read, method, path_values, raw_query, headers, body)
        .await
    {
        Ok(resp) => resp,
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

async fn run_exec_inner(
    state: &AppState,
    route: &Route,
    sibling_read: Option<&Route>,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    let verb = verb_for_method(method)?;
    let request_kind = verb;
    authorize(state, route, request_kind, method, path_values, raw_query, headers, body).await?;

    let names = query_param_names(route);
    let params = crate::binder::bind_request_params(
        route,
        method,
        path_values,
        raw_query,
        headers,
        body,
        state.config.query_string_as_json,
        &names,
    )?;
    let (principal, cookies_json) = principal_and_cookies(state, headers)?;
    let timeout = state.query_timeout();

    let mutate_path = sql_artifacts::mutate_path(&state.config.sql_root, verb, &route.name)?;
    let sql = sql_artifacts::read(&mutate_path)?;

    let mut tx = db::begin(&state.pool).await?;
    db::install_locals(&mut tx, &state.config, &principal, &cookies_json, timeout).await?;
    let rows = db::fetch_json_rows(&mut tx, &sql, &params, timeout).await?;

    let mut fragments = Vec::with_capacity(rows.len());
    if let Some(sibling) = sibling_read {
        let sibling_path_vars = sibling.path_vars();
        let sibling_query_names = query_param_names(sibling);
        let select_path = sql_artifacts::select_path(&state.config.sql_root, &sibling.name)?;
        let select_sql = sql_artifacts::read(&select_path)?;

        for row in &rows {
            let mut read_params: Vec<Option<String>> = sibling_path_vars
                .iter()
                .map(|name| crate::binder::path_var_param(row, name))
                .collect();
            read_params.extend(
                sibling_query_names
                    .iter()
                    .map(|name| crate::binder::query_param_from_row(row, name)),
            );
            let bytes = db::fetch_single_json(&mut tx, &select_sql, &read_params, timeout).await?;
            let value = match bytes {
                Some(b) if !b.is_empty() => serde_json::from_slice(&b)
                    .map_err(|e| AppError::Db(format!("sibling read returned invalid json: {e}")))?,
                _ => serde_json::Value::Null,
            };
            fragments.push(value);
        }
    }

    tx.commit().await?;

    let n = rows.len();
    Ok(match method {
        "POST" => {
            if n == 0 {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            } else {
                json_response(
                    StatusCode::CREATED,
                    serde_json::to_vec(&fragments).unwrap_or_default(),
                )
            }
        }
        "PUT" => {
            if n == 0 {
                StatusCode::NOT_FOUND.into_response()
            } else {
                json_response(
                    StatusCode::OK,
                    serde_json::to_vec(&fragments).unwrap_or_default(),
                )
            }
        }
        "DELETE" => {
            if n == 0 {
                StatusCode::NOT_FOUND.into_response()
            } else {
                StatusCode::NO_CONTENT.into_response()
            }
        }
        _ => return Err(AppError::MethodNotAllowed),
    })
}

/// `transaction`-route handler: manifest-ordered SQL steps in one transaction, each bound with
/// exactly `(principal, body)`. Wrapped by the same authorize middleware as every other route
/// type — the authorize SQL itself still receives the regular path/query/body-bound parameter
/// vector, not the transaction steps' `(principal, body)` pair, since parameter binding is
/// shared across all route types and is not transaction-aware.
pub async fn run_transaction(
    state: &AppState,
    route: &Route,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    match run_transaction_inner(state, route, method, path_values, raw_query, headers, body).await {
        Ok(resp) => resp,
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

async fn run_transaction_inner(
    state: &AppState,
    route: &Route,
    method: &str,
    path_values: &HashMap<String, String>,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    let request_kind = verb_for_method(method)?;
    authorize(state, route, request_kind, method, path_values, raw_query, headers, body).await?;

    let manifest_path = sql_artifacts::manifest_path(&state.config.sql_root, &route.name)?;
    let manifest_bytes = std::fs::read(&manifest_path)
        .map_err(|_| AppError::ArtifactMissing(format!("{} not found", manifest_path.display())))?;
    let steps = sql_artifacts::parse_manifest(&manifest_bytes)?;

    let (principal, cookies_json) = principal_and_cookies(state, headers)?;
    let body_text = std::str::from_utf8(body)
        .map_err(|e| AppError::Bind(format!("request body is not valid utf8: {e}")))?
        .to_string();
    let params = vec![Some(principal.clone()), Some(body_text)];
    let timeout = state.query_timeout();

    let mut tx = db::begin(&state.pool).await?;
    db::install_locals(&mut tx, &state.config, &principal, &cookies_json, timeout).await?;
    for step in &steps {
        let step_path = sql_artifacts::transaction_step_path(&state.config.sql_root, &route.name, step)?;
        let sql = sql_artifacts::read(&step_path)?;
        db::execute_discard(&mut tx, &sql, &params, timeout).await?;
    }
    tx.commit().await?;

    Ok(StatusCode::OK.into_response())
}

/// `service`-route reverse proxy: forwards to `service_url`, appending whatever path remained
/// after the route's own prefix was matched.
pub async fn run_service_proxy(
    state: &AppState,
    route: &Route,
    rest_path: &str,
    method: &axum::http::Method,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    match run_service_proxy_inner(state, route, rest_path, method, raw_query, headers, body).await {
        Ok(resp) => resp,
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

async fn run_service_proxy_inner(
    state: &AppState,
    route: &Route,
    rest_path: &str,
    method: &axum::http::Method,
    raw_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    authorize(
        state,
        route,
        route.r#type.service_request_kind().unwrap_or("service"),
        method.as_str(),
        &HashMap::new(),
        raw_query,
        headers,
        body,
    )
    .await?;

    let mut url = format!("{}/{}", route.service_url.trim_end_matches('/'), rest_path.trim_start_matches('/'));
    if !raw_query.is_empty() {
        url.push('?');
        url.push_str(raw_query);
    }

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| AppError::Bind(format!("invalid method for proxying: {e}")))?;
    let mut upstream = state.http_client.request(reqwest_method, &url);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            upstream = upstream.header(name.as_str(), value_str);
        }
    }
    upstream = upstream.body(body.to_vec());

    let response = upstream
        .send()
        .await
        .map_err(|e| AppError::Db(format!("upstream request failed: {e}")))?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Db(format!("upstream body read failed: {e}")))?;

    Ok((status, bytes).into_response())
}

/// Template-server handler: runs the configured `info` local-param SQL for the render data,
/// then renders the base/overlay pair for `url_path`.
pub async fn run_template(
    state: &AppState,
    prefix: &str,
    url_path: &str,
    headers: &HeaderMap,
) -> Response {
    match run_template_inner(state, prefix, url_path, headers).await {
        Ok(resp) => resp,
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

async fn run_template_inner(
    state: &AppState,
    prefix: &str,
    url_path: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let info_sql_path = state
        .config
        .app_user_local_params
        .get("info")
        .ok_or_else(|| AppError::ArtifactMissing("AppUserLocalParams[\"info\"] not configured".into()))?;
    let sql = std::fs::read_to_string(info_sql_path)
        .map_err(|_| AppError::ArtifactMissing(format!("{info_sql_path} not found")))?;

    let (principal, cookies_json) = principal_and_cookies(state, headers)?;
    let timeout = state.query_timeout();

    let mut tx = db::begin(&state.pool).await?;
    db::install_locals(&mut tx, &state.config, &principal, &cookies_json, timeout).await?;
    let bytes = db::fetch_single_json(&mut tx, &sql, &[], timeout).await?;
    tx.commit().await?;

    let data: serde_json::Value = match bytes {
        Some(b) if !b.is_empty() => serde_json::from_slice(&b)
            .map_err(|e| AppError::Db(format!("template info query returned invalid json: {e}")))?,
        _ => serde_json::Value::Object(Default::default()),
    };

    let rendered = state.templates.render(prefix, url_path, &data)?;
    Ok(([("content-type", "text/html; charset=utf-8")], rendered).into_response())
}
