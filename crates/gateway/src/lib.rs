//! HTTP gateway for Duckling.
//!
//! Serves the chat stream over SSE plus a few read-only endpoints:
//!
//! - `POST /api/chat`   run one turn, stream its frames
//! - `GET  /api/tools`  tool definitions
//! - `GET  /api/events` SSE stream of domain events
//! - `GET  /health`
//!
//! Built on Axum.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    extract::State,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use duckling_agent::{OrchestratorConfig, TurnOrchestrator};
use duckling_config::AppConfig;
use duckling_core::error::ToolError;
use duckling_core::event::EventBus;
use duckling_core::provider::Provider;
use duckling_core::tool::ToolRegistry;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("tool setup failed: {0}")]
    Tools(#[from] ToolError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state. Built once and shared by every request.
pub struct GatewayState {
    pub config: AppConfig,
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub event_bus: Arc<EventBus>,
    pub model: String,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Build the provider and tool registry described by `config`.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let provider = duckling_providers::build_from_config(&config);
        let tools = Arc::new(duckling_tools::default_registry(&config)?);
        let model = duckling_providers::router::resolve_model(&config);
        Ok(Self {
            config,
            provider,
            tools,
            event_bus: Arc::new(EventBus::default()),
            model,
        })
    }

    /// A fresh orchestrator for one request.
    pub fn orchestrator(&self) -> TurnOrchestrator {
        let config = OrchestratorConfig::from_app_config(
            &self.config,
            self.provider.clone(),
            self.tools.clone(),
            self.model.clone(),
        );
        TurnOrchestrator::new(config).with_event_bus(self.event_bus.clone())
    }
}

/// Build the router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(state.config.gateway.allowed_origin.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(api::chat_handler))
        .route("/api/tools", get(api::list_tools_handler))
        .route("/api/events", get(api::event_stream_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let origin = match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            warn!(error = %e, "Ignoring invalid gateway.allowed_origin, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(config)?);

    info!(
        addr = %addr,
        provider = state.provider.name(),
        model = %state.model,
        tools = state.tools.len(),
        "Gateway starting"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    model: String,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.name().to_string(),
        model: state.model.clone(),
    })
}
