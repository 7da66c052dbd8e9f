//! Application startup and lifecycle management.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::access::{CourseAccessGate, IdentityVerifier};
use crate::config::{ChatConfig, ProviderConfig};
use crate::handlers;
use crate::services::providers::TextProvider;
use crate::services::providers::deepseek::{DeepSeekConfig, DeepSeekTextProvider};
use crate::services::providers::mock::MockTextProvider;
use crate::services::providers::openai::{OpenAiConfig, OpenAiTextProvider};
use crate::services::{
    ChatDb, ChatOrchestrator, ConversationStore, MongoPolicyStore, PipelineOrchestrator,
};
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, security_headers_middleware};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: CourseAccessGate,
    pub identity: IdentityVerifier,
    pub conversations: Arc<dyn ConversationStore>,
    pub orchestrator: Arc<dyn ChatOrchestrator>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.conversations.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "chat-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "chat-service",
                "error": e.to_string()
            })),
        ),
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.conversations.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Build the service router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/courses/chat", post(handlers::chat::chat_stream))
        .route("/courses/info", get(handlers::course::course_info))
        .route(
            "/courses/conversations",
            get(handlers::conversations::list_conversations)
                .post(handlers::conversations::create_conversation)
                .delete(handlers::conversations::purge_conversations),
        )
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Select the upstream provider from configuration.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn TextProvider>, AppError> {
    match config.kind.as_str() {
        "deepseek" => Ok(Arc::new(DeepSeekTextProvider::new(DeepSeekConfig {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }))),
        "openai" => Ok(Arc::new(OpenAiTextProvider::new(OpenAiConfig {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }))),
        "mock" => Ok(Arc::new(MockTextProvider::new())),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Unknown provider kind '{}'",
            other
        ))),
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ChatConfig) -> Result<Self, AppError> {
        let db = ChatDb::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                e
            })?;

        db.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        let policy_store = MongoPolicyStore::new(db.client(), &config.mongodb.database);
        policy_store.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize policy indexes: {}", e);
            e
        })?;

        let provider = build_provider(&config.provider)?;
        tracing::info!(
            kind = %config.provider.kind,
            model = %config.provider.model,
            "Initialized text provider"
        );

        let state = AppState {
            gate: CourseAccessGate::new(Arc::new(policy_store)),
            identity: IdentityVerifier::new(&config.auth.jwt_secret),
            conversations: Arc::new(db),
            orchestrator: Arc::new(PipelineOrchestrator::new(provider)),
        };

        // Bind listener (port 0 = random port for testing)
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Chat service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, router(self.state)).await
    }
}
