use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::route_table::RouteTable;
use crate::{AppState, DynamicRouter};

/// Shared by the management listener: the live `AppState` plus the handle used to swap the
/// data-plane router.
#[derive(Clone)]
pub struct AdminState {
    pub app_state: AppState,
    pub data_router: DynamicRouter,
}

/// `POST /routes` on the management port: parses a replacement `RouteTable`, builds a fresh
/// data-plane router from it, and atomically swaps it in. In-flight requests on the old router
/// are unaffected — they already hold a cloned snapshot from before the swap.
pub fn build_management_router(admin_state: AdminState) -> Router {
    Router::new()
        .route("/routes", post(reload_routes))
        .with_state(admin_state)
}

async fn reload_routes(
    State(admin): State<AdminState>,
    body: axum::body::Bytes,
) -> Response {
    let table = match RouteTable::from_json(&body) {
        Ok(table) => table,
        Err(e) => return error_response(format!("invalid route table: {e}")),
    };

    let new_router = super::build_data_router(admin.app_state.clone(), &table);
    admin.data_router.swap(new_router);

    tracing::info!(routes = table.routes.len(), "reloaded route table");

    (StatusCode::OK, Json(table)).into_response()
}

fn error_response(message: String) -> Response {
    tracing::error!(%message, "admin route reload failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
