//! Process bootstrap: builds the router, binds a listener (walking forward
//! on port conflict the way the teacher's `gateway/daemon.rs::bind_with_fallback`
//! does), writes a PID file, and serves until shutdown. Exit codes follow
//! spec §6: `1` for a fatal config/bootstrap error, `2` when every
//! candidate port is already taken.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::ChatContext;
use crate::config::{AppConfig, app_dir};
use crate::credentials::{CredentialSelector, CredentialStore};
use crate::logging::RequestLogger;
use crate::state::AppState;
use crate::usage::UsageRecorder;

use super::auth::{auth_middleware, load_or_create_token};
use super::routes::{self, GatewayState};

pub fn pid_path() -> Result<PathBuf, String> {
    app_dir().map(|d| d.join("daemon.pid"))
}

/// Assembles every long-lived service the request pipeline shares
/// (spec §5: "No global mutable singleton beyond the database handles").
pub fn build_context(config: &AppConfig) -> Result<GatewayState, String> {
    let dir = app_dir()?;
    fs::create_dir_all(&dir).map_err(|e| format!("failed to create app dir: {e}"))?;

    let state = Arc::new(AppState::open(dir.join("local.json")).map_err(|e| e.to_string())?);
    let secrets = Arc::new(CredentialStore::open(&dir.join("secrets.sqlite3")).map_err(|e| e.to_string())?);
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.request_timeout_secs))
        .build()
        .map_err(|e| e.to_string())?;
    let selector = Arc::new(CredentialSelector::new(state.clone(), secrets.clone(), http.clone()));
    let usage = Arc::new(UsageRecorder::new(dir.join("usage.json")));
    let logger = Arc::new(RequestLogger::new(dir.clone(), config.logging.request_logs_enabled));

    Ok(Arc::new(ChatContext {
        state,
        secrets,
        selector,
        http,
        usage,
        logger,
    }))
}

fn build_router(state: GatewayState) -> Router {
    let chat_routes = Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/v1/messages", post(routes::messages))
        .route("/v1/responses", post(routes::responses))
        .route("/v1beta/models/{model_and_action}", post(routes::generate_content))
        .route("/v1/models", get(routes::list_models))
        .route("/health", get(routes::health));

    let config_routes = Router::new()
        .route("/v1/config/connections", get(routes::list_connections).post(routes::upsert_connection))
        .route("/v1/config/connections/{id}", axum::routing::delete(routes::delete_connection))
        .route("/v1/config/nodes", get(routes::list_nodes).post(routes::upsert_node))
        .route("/v1/config/aliases", get(routes::list_aliases))
        .route("/v1/config/aliases/{name}", post(routes::set_alias))
        .route("/v1/config/combos", get(routes::list_combos))
        .route("/v1/config/combos/{name}", post(routes::set_combo))
        .route("/v1/config/pricing/{key}", post(routes::set_pricing))
        .route("/v1/config/settings", get(routes::get_settings))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .merge(chat_routes)
        .merge(config_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds starting at `config.server.port`, trying up to
/// `config.server.max_port_attempts` sequential ports before giving up.
async fn bind_with_fallback(config: &AppConfig) -> Result<TcpListener, String> {
    for offset in 0..config.server.max_port_attempts {
        let port = config.server.port + offset;
        let addr: SocketAddr = format!("{}:{port}", config.server.bind_addr)
            .parse()
            .map_err(|e| format!("invalid bind address: {e}"))?;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < config.server.max_port_attempts => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {}-{}: {e}",
                    config.server.port,
                    config.server.port + config.server.max_port_attempts - 1
                ));
            }
        }
    }
    Err("no ports configured to try".to_string())
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create app dir: {e}"))?;
    }
    fs::write(&path, format!("{}\n{port}\n", std::process::id())).map_err(|e| format!("failed to write PID file: {e}"))
}

/// Binds, writes the PID file, and serves until the process is killed.
/// Returns `Err` on bootstrap failure (exit code `1`) or, specifically,
/// port exhaustion (exit code `2`, distinguished by [`BootstrapError`]).
pub async fn serve(config: AppConfig) -> Result<(), BootstrapError> {
    load_or_create_token().map_err(BootstrapError::Config)?;
    let ctx = build_context(&config).map_err(BootstrapError::Config)?;
    let router = build_router(ctx);

    let listener = bind_with_fallback(&config).await.map_err(BootstrapError::PortInUse)?;
    let addr = listener.local_addr().map_err(|e| BootstrapError::Config(e.to_string()))?;
    write_pid_file(addr.port()).map_err(BootstrapError::Config)?;

    tracing::info!(%addr, "nexus-gateway listening");
    axum::serve(listener, router).await.map_err(|e| BootstrapError::Config(e.to_string()))
}

#[derive(Debug)]
pub enum BootstrapError {
    Config(String),
    PortInUse(String),
}

impl BootstrapError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Config(_) => 1,
            BootstrapError::PortInUse(_) => 2,
        }
    }
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Config(msg) | BootstrapError::PortInUse(msg) => write!(f, "{msg}"),
        }
    }
}
