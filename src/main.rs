use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sql_gateway::routes::admin::{build_management_router, AdminState};
use sql_gateway::routes::build_data_router;
use sql_gateway::route_table::RouteTable;
use sql_gateway::template::TemplateRegistry;
use sql_gateway::{notify, AppState, DynamicRouter};

/// CLI flags: the only recognized flag is `--config <path>`.
#[derive(Parser, Debug)]
#[command(name = "sql-gateway")]
struct Cli {
    #[arg(long)]
    config: PathBuf,
}

/// main
///
/// Loads config, opens the database pool, starts the data-plane listener with an empty route
/// table (routes arrive exclusively through the admin endpoint) and a separate management
/// listener bound only to `POST /routes`.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sql_gateway=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match sql_gateway::config::Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    tracing::info!(sql_root = %config.sql_root, "configuration loaded");

    let pool = match PgPoolOptions::new()
        .min_connections(config.db_pool_size)
        .max_connections(config.db_pool_size)
        .connect(&config.db_conn_string)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            std::process::exit(1);
        }
    };

    let templates = match TemplateRegistry::load(&config.template_servers) {
        Ok(templates) => templates,
        Err(e) => {
            tracing::error!(error = %e, "failed to load template servers");
            std::process::exit(1);
        }
    };

    let listen_port = config.listen_port.clone();
    let management_port = config.management_port.clone();
    let db_conn_string = config.db_conn_string.clone();
    let db_notify_channels = config.db_notify_channels.clone();

    let state = AppState {
        config: Arc::new(config),
        pool,
        templates: Arc::new(templates),
        http_client: reqwest::Client::new(),
    };

    if let Err(e) = notify::spawn(&db_conn_string, db_notify_channels).await {
        tracing::error!(error = %e, "failed to start notification listener");
        std::process::exit(1);
    }

    // Routes are installed only via the admin endpoint; the data plane starts empty.
    let initial_table = RouteTable::default();
    let data_router = DynamicRouter::new(build_data_router(state.clone(), &initial_table));

    let admin_state = AdminState {
        app_state: state.clone(),
        data_router: data_router.clone(),
    };
    let management_router = build_management_router(admin_state);

    let data_listener = match TcpListener::bind(format!("0.0.0.0:{listen_port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = %listen_port, "failed to bind data-plane listener");
            std::process::exit(1);
        }
    };
    let management_listener = match TcpListener::bind(format!("0.0.0.0:{management_port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, port = %management_port, "failed to bind management listener");
            std::process::exit(1);
        }
    };

    tracing::info!(port = %listen_port, "data-plane listener bound");
    tracing::info!(port = %management_port, "management listener bound");

    let data_server = axum::serve(data_listener, Shared::new(data_router));
    let management_server = axum::serve(management_listener, management_router);

    let (data_result, management_result) = tokio::join!(data_server, management_server);
    if let Err(e) = data_result {
        tracing::error!(error = %e, "data-plane listener stopped");
        std::process::exit(1);
    }
    if let Err(e) = management_result {
        tracing::error!(error = %e, "management listener stopped");
        std::process::exit(1);
    }
}
