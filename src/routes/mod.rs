use std::collections::HashMap;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{on, MethodFilter};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

pub mod admin;

use crate::handlers;
use crate::route_table::{Route, RouteTable, RouteType};
use crate::AppState;

const REST_WILDCARD: &str = "__rest";

/// Builds the data-plane router from a `RouteTable` snapshot: one handler per route — each a
/// closure capturing its own `Route` (and, for mutating routes, its sibling `read` route) at
/// build time, since neither is an axum extractor — plus file-server and template-server
/// prefixes registered as fallbacks, wrapped in a request-id / tracing / CORS stack.
pub fn build_data_router(state: AppState, table: &RouteTable) -> Router {
    let mut router = Router::new();

    for route in &table.routes {
        router = match route.r#type {
            RouteType::Service => register_service_route(router, route),
            RouteType::Read => register_read_route(router, route),
            RouteType::Create | RouteType::Update | RouteType::Delete => {
                register_exec_route(router, route, table)
            }
            RouteType::Transaction => register_transaction_route(router, route),
        };
    }

    for (prefix, dir) in &state.config.file_servers {
        router = router.nest_service(prefix, ServeDir::new(dir));
    }
    for prefix in state.config.template_servers.keys() {
        router = register_template_prefix(router, prefix);
    }

    let x_request_id = axum::http::HeaderName::from_static("x-request-id");
    router
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_origin(Any)
                .allow_headers(Any),
        )
}

fn register_read_route(router: Router, route: &Route) -> Router {
    let route = route.clone();
    router.route(
        &route.url_scheme,
        on(
            MethodFilter::GET,
            move |State(state): State<AppState>,
                  Path(path): Path<HashMap<String, String>>,
                  RawQuery(query): RawQuery,
                  headers: HeaderMap,
                  body: axum::body::Bytes| {
                let route = route.clone();
                async move {
                    handlers::run_query(
                        &state,
                        &route,
                        &path,
                        query.as_deref().unwrap_or(""),
                        &headers,
                        &body,
                    )
                    .await
                }
            },
        ),
    )
}

fn register_exec_route(router: Router, route: &Route, table: &RouteTable) -> Router {
    let method_filter = match route.r#type {
        RouteType::Create => MethodFilter::POST,
        RouteType::Update => MethodFilter::PUT,
        RouteType::Delete => MethodFilter::DELETE,
        _ => unreachable!(),
    };
    let method_str = match route.r#type {
        RouteType::Create => "POST",
        RouteType::Update => "PUT",
        RouteType::Delete => "DELETE",
        _ => unreachable!(),
    };
    let route = route.clone();
    let sibling = table.sibling_read(&route.name).cloned();

    router.route(
        &route.url_scheme,
        on(
            method_filter,
            move |State(state): State<AppState>,
                  Path(path): Path<HashMap<String, String>>,
                  RawQuery(query): RawQuery,
                  headers: HeaderMap,
                  body: axum::body::Bytes| {
                let route = route.clone();
                let sibling = sibling.clone();
                async move {
                    handlers::run_exec(
                        &state,
                        &route,
                        sibling.as_ref(),
                        method_str,
                        &path,
                        query.as_deref().unwrap_or(""),
                        &headers,
                        &body,
                    )
                    .await
                }
            },
        ),
    )
}

fn register_transaction_route(router: Router, route: &Route) -> Router {
    let route = route.clone();
    router.route(
        &route.url_scheme,
        on(
            MethodFilter::POST | MethodFilter::PUT | MethodFilter::DELETE,
            move |State(state): State<AppState>,
                  Path(path): Path<HashMap<String, String>>,
                  RawQuery(query): RawQuery,
                  method: Method,
                  headers: HeaderMap,
                  body: axum::body::Bytes| {
                let route = route.clone();
                async move {
                    handlers::run_transaction(
                        &state,
                        &route,
                        method.as_str(),
                        &path,
                        query.as_deref().unwrap_or(""),
                        &headers,
                        &body,
                    )
                    .await
                }
            },
        ),
    )
}

fn register_service_route(router: Router, route: &Route) -> Router {
    // `axum::routing::MethodFilter` has no `CONNECT` variant (hyper treats CONNECT as a
    // tunneling upgrade, not an ordinary routed method), so this dispatches on `any()` instead
    // of a `MethodFilter` — it forwards whatever method actually reaches the router.
    let prefix = route.url_scheme.trim_end_matches('/').to_string();
    let wildcard_path = format!("{prefix}/{{*{REST_WILDCARD}}}");

    let exact_route = route.clone();
    let wildcard_route = route.clone();

    router
        .route(
            &prefix,
            axum::routing::any(
                move |State(state): State<AppState>,
                      method: Method,
                      RawQuery(query): RawQuery,
                      headers: HeaderMap,
                      body: axum::body::Bytes| {
                    let route = exact_route.clone();
                    async move {
                        handlers::run_service_proxy(
                            &state,
                            &route,
                            "",
                            &method,
                            query.as_deref().unwrap_or(""),
                            &headers,
                            &body,
                        )
                        .await
                    }
                },
            ),
        )
        .route(
            &wildcard_path,
            axum::routing::any(
                move |State(state): State<AppState>,
                      Path(path): Path<HashMap<String, String>>,
                      method: Method,
                      RawQuery(query): RawQuery,
                      headers: HeaderMap,
                      body: axum::body::Bytes| {
                    let route = wildcard_route.clone();
                    async move {
                        let rest = rest_from_path(&path);
                        handlers::run_service_proxy(
                            &state,
                            &route,
                            &rest,
                            &method,
                            query.as_deref().unwrap_or(""),
                            &headers,
                            &body,
                        )
                        .await
                    }
                },
            ),
        )
}

fn register_template_prefix(router: Router, prefix: &str) -> Router {
    let trimmed = prefix.trim_end_matches('/').to_string();
    let wildcard_path = format!("{trimmed}/{{*{REST_WILDCARD}}}");
    let exact_prefix = trimmed.clone();
    let wildcard_prefix = trimmed.clone();

    router
        .route(
            &trimmed,
            on(
                MethodFilter::GET,
                move |State(state): State<AppState>, headers: HeaderMap| {
                    let prefix = exact_prefix.clone();
                    async move { handlers::run_template(&state, &prefix, "", &headers).await }
                },
            ),
        )
        .route(
            &wildcard_path,
            on(
                MethodFilter::GET,
                move |State(state): State<AppState>,
                      Path(path): Path<HashMap<String, String>>,
                      headers: HeaderMap| {
                    let prefix = wildcard_prefix.clone();
                    async move {
                        let rest = rest_from_path(&path);
                        handlers::run_template(&state, &prefix, &rest, &headers).await
                    }
                },
            ),
        )
}

fn rest_from_path(path: &HashMap<String, String>) -> String {
    path.get(REST_WILDCARD).cloned().unwrap_or_default()
}

fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::template::TemplateRegistry;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// `connect_lazy` never opens a socket until a query actually runs, so router-dispatch
    /// tests (which only exercise axum's own path matching, never a handler body) don't need a
    /// live Postgres — unlike `tests/gateway_integration.rs`, which does.
    fn lazy_state() -> AppState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://postgres@localhost:5432/postgres")
            .expect("connect_lazy never touches the network");
        AppState {
            config: Arc::new(Config {
                debug: false,
                listen_port: "0".to_string(),
                management_port: "0".to_string(),
                db_conn_string: String::new(),
                db_pool_size: 1,
                db_query_timeout: 5,
                app_user_auth: Default::default(),
                app_user_local_params: HashMap::new(),
                sql_root: "/tmp".to_string(),
                file_servers: HashMap::new(),
                template_servers: HashMap::new(),
                query_string_as_json: true,
                db_notify_channels: vec![],
            }),
            pool,
            templates: Arc::new(TemplateRegistry::load(&HashMap::new()).unwrap()),
            http_client: reqwest::Client::new(),
        }
    }

    fn route(name: &str, url_scheme: &str) -> Route {
        Route {
            name: name.to_string(),
            r#type: RouteType::Read,
            url_scheme: url_scheme.to_string(),
            query_params: vec![],
            service_url: String::new(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn request_to_a_path_outside_the_table_is_404() {
        let state = lazy_state();
        let table = RouteTable { routes: vec![route("item", "/item/{id}")] };
        let router = build_data_router(state, &table);

        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/nope")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    /// After a hot reload, a route present only in the old table 404s while one present only
    /// in the new table dispatches — modeled here directly against `DynamicRouter::swap` rather
    /// than through the admin HTTP endpoint, since the swap mechanism itself (not the JSON
    /// plumbing around it) is what this test is pinning down.
    #[tokio::test]
    async fn hot_swap_replaces_the_dispatched_table_atomically() {
        let state = lazy_state();
        let old_table = RouteTable { routes: vec![route("old", "/old")] };
        let dynamic = crate::DynamicRouter::new(build_data_router(state.clone(), &old_table));

        let hits_old = axum::http::Request::builder()
            .method("GET")
            .uri("/old")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut svc = dynamic.clone();
        let response = tower::Service::call(&mut svc, hits_old).await.unwrap();
        assert_ne!(response.status(), axum::http::StatusCode::NOT_FOUND);

        let new_table = RouteTable { routes: vec![route("new", "/new")] };
        dynamic.swap(build_data_router(state, &new_table));

        let misses_old = axum::http::Request::builder()
            .method("GET")
            .uri("/old")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut svc = dynamic.clone();
        let response = tower::Service::call(&mut svc, misses_old).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);

        let hits_new = axum::http::Request::builder()
            .method("GET")
            .uri("/new")
            .body(axum::body::Body::empty())
            .unwrap();
        let mut svc = dynamic.clone();
        let response = tower::Service::call(&mut svc, hits_new).await.unwrap();
        assert_ne!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
