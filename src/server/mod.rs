use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span, warn};

use crate::config::{Settings, load_settings};
use crate::logging;
use crate::store::{ConfigStore, WriteLocks};

mod cgi;
mod config;
mod configs;
mod control;
mod logs;
mod status;
mod util;

const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

const ROUTE_PREFIX: &str = "/cgi-bin";
const ROUTE_SUFFIXES: [&str; 3] = ["", ".sh", ".py"];

#[derive(Parser, Debug)]
#[command(name = "xkeen-panel")]
#[command(author = "")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Config, control, log and status endpoints for xray/xkeen", long_about = None)]
struct Cli {
    /// Path to settings.toml
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the HTTP server (default)
    Serve,
    /// Answer a single CGI request from the environment and stdin
    Cgi {
        /// Endpoint name; defaults to the stem of SCRIPT_NAME
        endpoint: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    let mode = args.mode.unwrap_or(Mode::Serve);
    logging::init_logging(match mode {
        Mode::Serve => "info",
        Mode::Cgi { .. } => "warn",
    });

    let settings = match (load_settings(args.config.as_deref()), &mode) {
        (Ok(settings), _) => settings,
        (Err(err), Mode::Cgi { .. }) => return cgi::run_failed(err).await,
        (Err(err), Mode::Serve) => return Err(err),
    };
    let state = AppState::new(settings);

    match mode {
        Mode::Serve => serve(state).await,
        Mode::Cgi { endpoint } => {
            let Some(endpoint) = endpoint.or_else(cgi::endpoint_from_env) else {
                return cgi::run_failed(anyhow!("no endpoint given and SCRIPT_NAME is not set"))
                    .await;
            };
            let limit = state.settings.server.max_body_bytes;
            cgi::run_once(router(state), &endpoint, limit).await
        }
    }
}

async fn serve(state: AppState) -> Result<()> {
    let listen_addr = format!(
        "{}:{}",
        state.settings.server.listen, state.settings.server.port
    );
    let app = router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                info_span!("request", method = %req.method(), uri = %req.uri())
            })
            .on_request(())
            .on_response(|res: &Response<_>, latency: Duration, _span: &Span| {
                let status = res.status();
                let latency_ms = latency.as_millis() as u64;
                if status.is_client_error() || status.is_server_error() {
                    warn!(%status, latency_ms, "answered");
                } else {
                    info!(%status, latency_ms, "answered");
                }
            })
            .on_failure(()),
    );

    info!("binding panel server to {listen_addr}");
    let listener = TcpListener::bind(&listen_addr)
        .await
        .context(format!("failed to bind {listen_addr}"))?;
    info!("server started on {listen_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// All endpoints, each reachable as `/cgi-bin/<name>`, `<name>.sh` and `<name>.py`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.server.max_body_bytes;
    let mut app = Router::new();
    for (name, allow, methods) in [
        (
            "config",
            "GET, POST",
            get(config::read_config)
                .post(config::write_config)
                .fallback(method_not_allowed),
        ),
        (
            "configs",
            "GET, POST, DELETE",
            get(configs::list_configs)
                .post(configs::mutate_configs)
                .delete(configs::mutate_configs)
                .fallback(method_not_allowed),
        ),
        (
            "control",
            "POST",
            axum::routing::post(control::control).fallback(only_post),
        ),
        ("logs", "GET", any(logs::read_logs)),
        ("status", "GET", any(status::read_status)),
        ("version", "GET", any(version)),
    ] {
        let methods = methods.layer(middleware::from_fn_with_state(allow, cors_headers));
        for suffix in ROUTE_SUFFIXES {
            app = app.route(&format!("{ROUTE_PREFIX}/{name}{suffix}"), methods.clone());
        }
    }

    app.fallback(handle_404)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(api_no_cache))
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub locks: WriteLocks,
    pub store: ConfigStore,
    /// Held for the duration of one control action.
    pub control_gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let locks = WriteLocks::default();
        let store = ConfigStore::new(
            settings.xray.configs_dir.clone(),
            settings.xray.lists_dir.clone(),
            locks.clone(),
        );
        Self {
            settings: Arc::new(settings),
            locks,
            store,
            control_gate: Arc::new(Mutex::new(())),
        }
    }
}

/// `{success, error?, ...payload}` body shared by the config, configs, control and logs endpoints.
#[derive(Debug, Serialize)]
pub struct Outcome<T = ()> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    payload: Option<T>,
}

impl Outcome<()> {
    pub fn done() -> Self {
        Self {
            success: true,
            error: None,
            payload: None,
        }
    }
}

impl<T> Outcome<T> {
    pub fn ok(payload: T) -> Self {
        Self::reported(true, payload)
    }

    /// Completed request whose success is decided by the payload's source.
    pub fn reported(success: bool, payload: T) -> Self {
        Self {
            success,
            error: None,
            payload: Some(payload),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            payload: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Data {
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct Version {
    version: &'static str,
}

async fn version() -> Json<Outcome<Version>> {
    Json(Outcome::ok(Version { version: VERSION }))
}

async fn cors_headers(
    State(allow): State<&'static str>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(allow),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    res
}

async fn api_no_cache(req: axum::http::Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    res
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn only_post() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Only POST allowed")
}

async fn handle_404(uri: axum::http::Uri) -> ApiError {
    warn!(uri = %uri, "unmatched route");
    ApiError::new(StatusCode::NOT_FOUND, "not found")
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(err: impl Into<anyhow::Error>) -> Self {
        let msg = format!("{:#}", err.into());
        warn!(error = %msg, "internal error while handling request");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            warn!(status = %self.status, message = %self.message, "client error");
        }
        let body = Json(Outcome::<()>::failed(self.message));
        (self.status, body).into_response()
    }
}
