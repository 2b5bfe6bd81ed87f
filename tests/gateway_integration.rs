//! Integration tests exercising the handler chain end to end against a live Postgres, reached
//! via `DATABASE_URL` (`dotenv().ok()` then `env::var("DATABASE_URL").expect(...)`). Each test
//! builds its own fixture SQL-root tree with `tempfile::tempdir()` and works against a
//! dedicated table name so the tests can run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use sqlx::postgres::PgPoolOptions;

use sql_gateway::config::{AppUserAuth, Config};
use sql_gateway::handlers;
use sql_gateway::route_table::{Route, RouteType};
use sql_gateway::template::TemplateRegistry;
use sql_gateway::AppState;

async fn test_state(sql_root: &std::path::Path) -> AppState {
    dotenv::dotenv().ok();
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set to run these tests");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await
        .expect("failed to connect to test database");

    let config = Config {
        debug: true,
        listen_port: "0".to_string(),
        management_port: "0".to_string(),
        db_conn_string: db_url,
        db_pool_size: 4,
        db_query_timeout: 5,
        app_user_auth: AppUserAuth::default(),
        app_user_local_params: HashMap::new(),
        sql_root: sql_root.to_str().unwrap().to_string(),
        file_servers: HashMap::new(),
        template_servers: HashMap::new(),
        query_string_as_json: true,
        db_notify_channels: vec![],
    };

    AppState {
        config: Arc::new(config),
        pool,
        templates: Arc::new(TemplateRegistry::load(&HashMap::new()).unwrap()),
        http_client: reqwest::Client::new(),
    }
}

fn write_sql(sql_root: &std::path::Path, relative: &str, contents: &str) {
    let path = sql_root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read_route(name: &str, url_scheme: &str) -> Route {
    Route {
        name: name.to_string(),
        r#type: RouteType::Read,
        url_scheme: url_scheme.to_string(),
        query_params: vec![],
        service_url: String::new(),
        description: String::new(),
    }
}

async fn recreate_table(state: &AppState, table: &str) {
    sqlx::query(&format!("drop table if exists {table}"))
        .execute(&state.pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        "create table {table} (id serial primary key, name text not null)"
    ))
    .execute(&state.pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn read_route_returns_200_on_hit_and_404_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_item").await;
    sqlx::query("insert into gateway_test_item (id, name) values (1, 'widget')")
        .execute(&state.pool)
        .await
        .unwrap();

    write_sql(
        dir.path(),
        "auth/select/item.sql",
        "select true from (select $1::text, $2::text) x",
    );
    write_sql(
        dir.path(),
        "select/item.sql",
        "select row_to_json(w) from gateway_test_item w where w.id = $1::int and $2::text is not null",
    );
    let route = read_route("item", "/items/{id}");

    let mut hit_path = HashMap::new();
    hit_path.insert("id".to_string(), "1".to_string());
    let hit = handlers::run_query(&state, &route, &hit_path, "", &HeaderMap::new(), b"").await;
    assert_eq!(hit.status(), axum::http::StatusCode::OK);

    let mut miss_path = HashMap::new();
    miss_path.insert("id".to_string(), "999".to_string());
    let miss = handlers::run_query(&state, &route, &miss_path, "", &HeaderMap::new(), b"").await;
    assert_eq!(miss.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_route_returns_200_empty_array_when_aggregate_is_null() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_agg").await;

    write_sql(
        dir.path(),
        "auth/select/agg.sql",
        "select true from (select $1::text) x",
    );
    write_sql(
        dir.path(),
        "select/agg.sql",
        "select json_agg(row_to_json(w)) from gateway_test_agg w",
    );
    let route = read_route("agg", "/agg");

    let resp = handlers::run_query(&state, &route, &HashMap::new(), "", &HeaderMap::new(), b"").await;
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"[]");
}

#[tokio::test]
async fn create_chain_runs_write_then_read_and_returns_fragments() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_widget").await;

    write_sql(
        dir.path(),
        "auth/insert/widget.sql",
        "select true from (select $1::text) x",
    );
    write_sql(
        dir.path(),
        "insert/widget.sql",
        "insert into gateway_test_widget (name) values (($1::json)->>'name') returning json_build_object('id', id) as j",
    );
    write_sql(
        dir.path(),
        "select/widget.sql",
        "select row_to_json(w) from gateway_test_widget w where w.id = $1::int",
    );

    let create_route = Route {
        name: "widget".to_string(),
        r#type: RouteType::Create,
        url_scheme: "/widgets".to_string(),
        query_params: vec![],
        service_url: String::new(),
        description: String::new(),
    };
    let read_sibling = read_route("widget", "/widgets/{id}");

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().unwrap());
    let body = br#"{"name":"gizmo"}"#;

    let resp = handlers::run_exec(
        &state,
        &create_route,
        Some(&read_sibling),
        "POST",
        &HashMap::new(),
        "",
        &headers,
        body,
    )
    .await;

    assert_eq!(resp.status(), axum::http::StatusCode::CREATED);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let fragments: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0]["name"], serde_json::json!("gizmo"));
}

#[tokio::test]
async fn delete_returns_404_when_nothing_matched_and_204_when_a_row_was_removed() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_deleteme").await;
    sqlx::query("insert into gateway_test_deleteme (id, name) values (7, 'gone-soon')")
        .execute(&state.pool)
        .await
        .unwrap();

    write_sql(
        dir.path(),
        "auth/delete/deleteme.sql",
        "select true from (select $1::text) x",
    );
    write_sql(
        dir.path(),
        "delete/deleteme.sql",
        "delete from gateway_test_deleteme where id = $1::int returning json_build_object('id', id) as j",
    );
    let route = Route {
        name: "deleteme".to_string(),
        r#type: RouteType::Delete,
        url_scheme: "/deleteme/{id}".to_string(),
        query_params: vec![],
        service_url: String::new(),
        description: String::new(),
    };

    let mut miss_path = HashMap::new();
    miss_path.insert("id".to_string(), "123".to_string());
    let miss = handlers::run_exec(&state, &route, None, "DELETE", &miss_path, "", &HeaderMap::new(), b"").await;
    assert_eq!(miss.status(), axum::http::StatusCode::NOT_FOUND);

    let mut hit_path = HashMap::new();
    hit_path.insert("id".to_string(), "7".to_string());
    let hit = handlers::run_exec(&state, &route, None, "DELETE", &hit_path, "", &HeaderMap::new(), b"").await;
    assert_eq!(hit.status(), axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn authorize_sql_returning_false_denies_with_403() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_secret").await;

    write_sql(
        dir.path(),
        "auth/select/secret.sql",
        "select false as authorized from (select $1::text as qs) x",
    );
    write_sql(
        dir.path(),
        "select/secret.sql",
        "select json_agg(row_to_json(w)) from gateway_test_secret w",
    );
    let route = read_route("secret", "/secret");

    let resp = handlers::run_query(&state, &route, &HashMap::new(), "", &HeaderMap::new(), b"").await;
    assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn transaction_route_runs_manifest_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    recreate_table(&state, "gateway_test_txn").await;

    write_sql(dir.path(), "auth/insert/bootstrap.sql", "select true");
    write_sql(
        dir.path(),
        "transaction/bootstrap/manifest.json",
        "first.sql\nsecond.sql\n",
    );
    write_sql(
        dir.path(),
        "transaction/bootstrap/first.sql",
        "insert into gateway_test_txn (name) values ('step-one:' || $1::text || ':' || $2::text)",
    );
    write_sql(
        dir.path(),
        "transaction/bootstrap/second.sql",
        "insert into gateway_test_txn (name) values ('step-two:' || $1::text || ':' || $2::text)",
    );
    let route = Route {
        name: "bootstrap".to_string(),
        r#type: RouteType::Transaction,
        url_scheme: "/bootstrap".to_string(),
        query_params: vec![],
        service_url: String::new(),
        description: String::new(),
    };

    let resp = handlers::run_transaction(
        &state,
        &route,
        "POST",
        &HashMap::new(),
        "",
        &HeaderMap::new(),
        b"{}",
    )
    .await;
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let count: i64 = sqlx::query_scalar("select count(*) from gateway_test_txn")
        .fetch_one(&state.pool)
        .await
        .unwrap();
    assert_eq!(count, 2);
}
