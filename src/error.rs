use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// AppError
///
/// A closed error taxonomy rather than a boxed `dyn Error` — every variant maps to exactly one
/// status code, with enough of a message carried along to support the `Debug` echo response.
#[derive(Debug)]
pub enum AppError {
    /// SQL file not found under `SQLRoot`.
    ArtifactMissing(String),
    /// Configured cookie/header for identity extraction was absent.
    IdentityMissing(String),
    /// JWT did not have three segments, or its payload segment did not base64/JSON-decode.
    IdentityMalformed(String),
    /// Authorization SQL returned false. Never a 500 — the only variant that isn't one.
    AuthDenied,
    /// Any database error, transient or permanent; the transaction has already been rolled
    /// back (or never committed) by the time this is constructed.
    Db(String),
    /// A `sqlx` call did not finish inside `DBQueryTimeout`.
    DbTimeout,
    /// Malformed query string or request body.
    Bind(String),
    /// An HTTP method reached the exec handler that it doesn't recognize.
    MethodNotAllowed,
    /// Startup-only: bad config file or admin route payload.
    ConfigInvalid(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::ArtifactMissing(m) => write!(f, "{m}"),
            AppError::IdentityMissing(m) => write!(f, "{m}"),
            AppError::IdentityMalformed(m) => write!(f, "{m}"),
            AppError::AuthDenied => write!(f, "forbidden"),
            AppError::Db(m) => write!(f, "{m}"),
            AppError::DbTimeout => write!(f, "database call timed out"),
            AppError::Bind(m) => write!(f, "{m}"),
            AppError::MethodNotAllowed => write!(f, "method not allowed"),
            AppError::ConfigInvalid(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Db(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::ArtifactMissing(e.to_string())
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthDenied => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the `{"error": "..."}` body used when `Config.debug` is set; callers
    /// that have access to `Config` should prefer `into_response_with_debug` over the bare
    /// `IntoResponse` impl, which always suppresses the body (fails safe for code paths that
    /// reach for `?` without threading `debug` through).
    pub fn into_response_with_debug(self, debug: bool) -> Response {
        let status = self.status();
        tracing::error!(%self, "request failed");
        if debug && status != StatusCode::FORBIDDEN {
            let body = serde_json::json!({ "error": self.to_string() }).to_string();
            (status, [("content-type", "application/json")], body).into_response()
        } else {
            status.into_response()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with_debug(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_denied_is_forbidden_with_empty_body() {
        let response = AppError::AuthDenied.into_response_with_debug(true);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn db_error_is_500_and_echoes_only_when_debug() {
        let quiet = AppError::Db("boom".into()).into_response_with_debug(false);
        assert_eq!(quiet.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let loud = AppError::Db("boom".into()).into_response_with_debug(true);
        assert_eq!(loud.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn method_not_allowed_is_501() {
        let response = AppError::MethodNotAllowed.into_response_with_debug(false);
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
