use std::time::Duration;

use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::config::Config;
use crate::error::AppError;

pub type Tx<'a> = Transaction<'a, Postgres>;

/// Opens a fresh transaction from the pool. The pool is sized at construction time in
/// `main.rs`; this function never blocks longer than a pool checkout already would.
pub async fn begin(pool: &PgPool) -> Result<Tx<'static>, AppError> {
    Ok(pool.begin().await?)
}

/// `request_kind` for a route dispatched by HTTP method: GET→select, POST→insert, PUT→update,
/// DELETE→delete. `service`-type routes use the literal `"service"` regardless of method and
/// are not produced by this function.
pub fn request_kind_for_method(method: &str) -> Option<&'static str> {
    match method {
        "GET" => Some("select"),
        "POST" => Some("insert"),
        "PUT" => Some("update"),
        "DELETE" => Some("delete"),
        _ => None,
    }
}

/// Installs `app_user.auth` and `app_user.cookies` as transaction-local settings unconditionally,
/// then one `app_user.<key>` per configured local param, each derived by running that entry's
/// SQL as a parameterless single-value query.
pub async fn install_locals(
    tx: &mut Tx<'_>,
    config: &Config,
    auth: &str,
    cookies_json: &str,
    timeout: Duration,
) -> Result<(), AppError> {
    set_local(tx, "app_user.auth", auth, timeout).await?;
    set_local(tx, "app_user.cookies", cookies_json, timeout).await?;
    for (key, path) in &config.app_user_local_params {
        let sql = std::fs::read_to_string(path)
            .map_err(|_| AppError::ArtifactMissing(format!("{path} not found")))?;
        let value = fetch_scalar_string(tx, &sql, timeout).await?;
        set_local(tx, &format!("app_user.{key}"), &value, timeout).await?;
    }
    Ok(())
}

async fn set_local(
    tx: &mut Tx<'_>,
    key: &str,
    value: &str,
    timeout: Duration,
) -> Result<(), AppError> {
    let sql = format!("select set_config('{key}', $1, true)");
    run_timeout(
        timeout,
        sqlx::query(&sql).bind(value).execute(&mut **tx),
    )
    .await?;
    Ok(())
}

/// Runs `sql` bound with `params` (each a nullable text parameter, see `binder.rs`) and returns
/// the single boolean column of its single row — the shape of an authorize-SQL file.
pub async fn fetch_bool(
    tx: &mut Tx<'_>,
    sql: &str,
    params: &[Option<String>],
    timeout: Duration,
) -> Result<bool, AppError> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    let row = run_timeout(timeout, query.fetch_one(&mut **tx)).await?;
    Ok(row.try_get::<bool, _>(0)?)
}

/// Runs `sql` and returns the raw bytes of its single row's single raw-JSON column, or `None`
/// if zero rows were returned — the distinction the query handler needs between "200 `[]`"
/// (one row whose JSON column is SQL NULL, e.g. `json_agg` over an empty set) and "404" (no row
/// at all).
pub async fn fetch_single_json(
    tx: &mut Tx<'_>,
    sql: &str,
    params: &[Option<String>],
    timeout: Duration,
) -> Result<Option<Vec<u8>>, AppError> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    let rows = run_timeout(timeout, query.fetch_all(&mut **tx)).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    // Only the last row's bytes matter: a query that returns multiple rows keeps overwriting
    // the captured value rather than breaking after the first row.
    let mut last: Option<serde_json::Value> = None;
    for row in &rows {
        last = row.try_get::<Option<serde_json::Value>, _>(0)?;
    }
    match last {
        Some(value) => Ok(Some(serde_json::to_vec(&value).unwrap_or_default())),
        None => Ok(Some(Vec::new())),
    }
}

/// Runs a mutating SQL statement and returns every affected row, decoded to owned
/// `serde_json::Value`s — `sqlx::Row` values are already owned once materialized, so no
/// buffer-lifetime juggling is needed here.
pub async fn fetch_json_rows(
    tx: &mut Tx<'_>,
    sql: &str,
    params: &[Option<String>],
    timeout: Duration,
) -> Result<Vec<serde_json::Value>, AppError> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    let rows = run_timeout(timeout, query.fetch_all(&mut **tx)).await?;
    rows.iter()
        .map(|row| row.try_get::<serde_json::Value, _>(0).map_err(AppError::from))
        .collect()
}

async fn fetch_scalar_string(
    tx: &mut Tx<'_>,
    sql: &str,
    timeout: Duration,
) -> Result<String, AppError> {
    let row = run_timeout(timeout, sqlx::query(sql).fetch_one(&mut **tx)).await?;
    Ok(row.try_get::<String, _>(0)?)
}

/// Executes `sql` bound with `params`, discarding any result rows — used by the transaction
/// route runner, which consumes no output.
pub async fn execute_discard(
    tx: &mut Tx<'_>,
    sql: &str,
    params: &[Option<String>],
    timeout: Duration,
) -> Result<(), AppError> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    run_timeout(timeout, query.execute(&mut **tx)).await?;
    Ok(())
}

async fn run_timeout<T, E>(
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, AppError>
where
    AppError: From<E>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AppError::DbTimeout),
    }
}
