//! # Authorization HTTP Server
//!
//! HTTP front for the permission engine over a snapshot file.
//!
//! ## Endpoints
//!
//! - `POST /v1/check` - Boolean decision for one request
//! - `POST /v1/explain` - Decision plus the contributing rule
//! - `POST /v1/limits` - Aggregated limits
//! - `POST /v1/effective` - Full effective permission map
//! - `GET /health` - Health check
//!
//! Unknown principals are answered like principals without assignments:
//! denied, never an error.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `AUTHZ_SNAPSHOT` - JSON snapshot path (required)
//! - `AUTHZ_CONFIG` - TOML engine configuration path (optional)
//! - `AUTHZ_*` - engine overrides, see `EngineConfig::with_env_overrides`
//! - `RUST_LOG` - Log level (default: info)

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
    serve,
};
use scopegate_authz::{
    engine::{AggregatedLimits, CacheStats},
    AttributeContext, ConfigSnapshot, EffectivePermissions, EngineConfig, Explanation, PermissionEngine,
    Principal, ScopeRef,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<PermissionEngine>,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Principal and scope context shared by every query
#[derive(Debug, Deserialize)]
struct Subject {
    principal: String,
    /// `GLOBAL`, `COMPANY:c1`, `BUSINESS:b1` or `OUTLET:o1`
    scope: String,
}

impl Subject {
    fn resolve(&self, engine: &PermissionEngine) -> Result<(Principal, ScopeRef), AppError> {
        let scope: ScopeRef = self
            .scope
            .parse()
            .map_err(|e| AppError::BadRequest(format!("invalid scope '{}': {}", self.scope, e)))?;

        let principal = match engine.snapshot().principal(&self.principal) {
            Some(principal) => principal.clone(),
            None => {
                warn!("Unknown principal '{}'; answering without assignments", self.principal);
                Principal::new(self.principal.clone())
            }
        };

        Ok((principal, scope))
    }
}

/// Single-pair request
#[derive(Debug, Deserialize)]
struct CheckRequest {
    #[serde(flatten)]
    subject: Subject,
    resource: String,
    action: String,
    #[serde(default)]
    attributes: AttributeContext,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    version: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
    snapshot_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<CacheStats>,
}

/// POST /v1/check
async fn check(State(state): State<AppState>, Json(req): Json<CheckRequest>) -> Result<Json<CheckResponse>, AppError> {
    let (principal, scope) = req.subject.resolve(&state.engine)?;
    let allowed = state
        .engine
        .is_allowed(&principal, &scope, &req.resource, &req.action, &req.attributes);

    info!(
        "Check: principal={}, scope={}, {}:{} -> {}",
        principal.id,
        scope,
        req.resource,
        req.action,
        if allowed { "ALLOW" } else { "DENY" }
    );

    Ok(Json(CheckResponse {
        allowed,
        version: state.engine.version(),
    }))
}

/// POST /v1/explain
async fn explain(State(state): State<AppState>, Json(req): Json<CheckRequest>) -> Result<Json<Explanation>, AppError> {
    let (principal, scope) = req.subject.resolve(&state.engine)?;
    Ok(Json(state.engine.explain(
        &principal,
        &scope,
        &req.resource,
        &req.action,
        &req.attributes,
    )))
}

/// POST /v1/limits
async fn limits(State(state): State<AppState>, Json(req): Json<Subject>) -> Result<Json<AggregatedLimits>, AppError> {
    let (principal, scope) = req.resolve(&state.engine)?;
    Ok(Json(state.engine.limits_report(&principal, &scope)))
}

/// POST /v1/effective
async fn effective(
    State(state): State<AppState>,
    Json(req): Json<Subject>,
) -> Result<Json<EffectivePermissions>, AppError> {
    let (principal, scope) = req.resolve(&state.engine)?;
    let permissions = state.engine.get_effective_permissions(&principal, &scope);
    Ok(Json(permissions.as_ref().clone()))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: scopegate_authz::VERSION.to_string(),
        snapshot_version: state.engine.version(),
        cache: state.engine.cache_stats(),
    })
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create tracing layer
    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/check", post(check))
        .route("/v1/explain", post(explain))
        .route("/v1/limits", post(limits))
        .route("/v1/effective", post(effective))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(trace)
                .layer(cors)
        )
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn load_config() -> anyhow::Result<EngineConfig> {
    let config = match std::env::var("AUTHZ_CONFIG") {
        Ok(path) => {
            info!("Loading engine configuration from {}", path);
            EngineConfig::load(&path)?
        }
        Err(_) => EngineConfig::default(),
    };

    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Scopegate Authorization Server v{}", scopegate_authz::VERSION);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let config = load_config().context("Invalid engine configuration")?;

    let snapshot_path = std::env::var("AUTHZ_SNAPSHOT").context("AUTHZ_SNAPSHOT must name a snapshot file")?;
    let snapshot = ConfigSnapshot::load(&snapshot_path)
        .with_context(|| format!("Failed to load snapshot {}", snapshot_path))?;

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Snapshot: {} (v{})", snapshot_path, snapshot.version());
    info!("  Cache: {} (capacity {})", config.enable_cache, config.cache_capacity);

    let state = AppState {
        engine: Arc::new(PermissionEngine::new(config, snapshot)),
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
