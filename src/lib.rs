use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::extract::FromRef;
use sqlx::PgPool;

pub mod binder;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod notify;
pub mod route_table;
pub mod routes;
pub mod sql_artifacts;
pub mod template;

use config::Config;
use template::TemplateRegistry;

/// AppState
///
/// The single, thread-safe container shared by every request handler. `config` and `pool` are
/// genuinely immutable for the process lifetime (an admin reload never touches either — only
/// the route table is hot-swappable).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub templates: Arc<TemplateRegistry>,
    pub http_client: reqwest::Client,
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Arc<Config> {
        state.config.clone()
    }
}

impl AppState {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.config.db_query_timeout)
    }
}

/// DynamicRouter
///
/// A `tower::Service` wrapping an atomically-swappable, already-built `axum::Router` snapshot.
/// `axum::Router` is itself cheap to clone (`Arc`-backed internally), so each request clones out
/// the current snapshot and dispatches against it; an admin reload swaps the `ArcSwap` pointer
/// to a freshly built router without disturbing requests already dispatched against the old one.
#[derive(Clone)]
pub struct DynamicRouter {
    current: Arc<ArcSwap<axum::Router>>,
}

impl DynamicRouter {
    pub fn new(router: axum::Router) -> Self {
        Self {
            current: Arc::new(ArcSwap::new(Arc::new(router))),
        }
    }

    pub fn swap(&self, router: axum::Router) {
        self.current.store(Arc::new(router));
    }
}

impl tower::Service<axum::extract::Request> for DynamicRouter {
    type Response = axum::response::Response;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: axum::extract::Request) -> Self::Future {
        let mut router = (*self.current.load_full()).clone();
        Box::pin(async move {
            use tower::Service;
            router.call(request).await
        })
    }
}
