use std::path::{Path, PathBuf};

use crate::config::clean_path;
use crate::error::AppError;

/// Resolves a filesystem path under the configured SQL root, lexically cleaning it and then
/// checking it still starts with the (also cleaned) root — this keeps a route name like
/// `../../etc/passwd` from escaping the artifact tree.
fn resolve_under_root(sql_root: &str, relative: &[&str]) -> Result<PathBuf, AppError> {
    let root = Path::new(sql_root);
    let mut joined = root.to_path_buf();
    for segment in relative {
        joined.push(segment);
    }
    let cleaned = clean_path(&joined);
    let cleaned_root = clean_path(root);
    if !cleaned.starts_with(&cleaned_root) {
        return Err(AppError::ArtifactMissing(format!(
            "{} escapes SQLRoot",
            relative.join("/")
        )));
    }
    Ok(cleaned)
}

/// `auth/<select|insert|update|delete|service>/<route_name>.sql`.
pub fn authorize_path(sql_root: &str, request_kind: &str, route_name: &str) -> Result<PathBuf, AppError> {
    resolve_under_root(
        sql_root,
        &["auth", request_kind, &format!("{route_name}.sql")],
    )
}

/// `select/<route_name>.sql`.
pub fn select_path(sql_root: &str, route_name: &str) -> Result<PathBuf, AppError> {
    resolve_under_root(sql_root, &["select", &format!("{route_name}.sql")])
}

/// `insert|update|delete/<route_name>.sql`.
pub fn mutate_path(sql_root: &str, verb: &str, route_name: &str) -> Result<PathBuf, AppError> {
    resolve_under_root(sql_root, &[verb, &format!("{route_name}.sql")])
}

/// `transaction/<route_name>/manifest.json`.
pub fn manifest_path(sql_root: &str, route_name: &str) -> Result<PathBuf, AppError> {
    resolve_under_root(sql_root, &["transaction", route_name, "manifest.json"])
}

/// `transaction/<route_name>/<step>.sql`.
pub fn transaction_step_path(
    sql_root: &str,
    route_name: &str,
    step: &str,
) -> Result<PathBuf, AppError> {
    resolve_under_root(sql_root, &["transaction", route_name, step])
}

/// Reads SQL text from a resolved path, mapping a missing/unreadable file to
/// `AppError::ArtifactMissing` rather than a bare I/O error.
pub fn read(path: &Path) -> Result<String, AppError> {
    std::fs::read_to_string(path)
        .map_err(|_| AppError::ArtifactMissing(format!("{} not found", path.display())))
}

/// Parses a `manifest.json` file: one SQL step filename per non-empty line. Rejects empty lines
/// and any filename containing a path separator, which would otherwise let a manifest step
/// escape its own `transaction/<route_name>/` directory.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<String>, AppError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::ConfigInvalid(format!("manifest is not valid utf8: {e}")))?;
    let mut steps = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains('/') || line.contains('\\') {
            return Err(AppError::ConfigInvalid(format!(
                "manifest step {line:?} must not contain a path separator"
            )));
        }
        steps.push(line.to_string());
    }
    Ok(steps)
}
