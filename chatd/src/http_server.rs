use crate::coordinator::{Coordinator, CoordinatorError};
use avatar_core::dialogue::DialogueReply;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Body returned to clients for any failed chat turn
pub const GENERIC_ERROR: &str = "An error occurred while processing your request.";

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
}

/// Request model for chat turns
#[derive(Deserialize, Default, Debug)]
pub struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
}

/// Error type for HTTP server
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(CoordinatorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(reason) => {
                warn!(reason = %reason, "Rejected chat request");
                let body = Json(ErrorResponse { error: reason });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            Self::Internal(e) => {
                // The cause stays in the log; clients only get the generic message
                error!(error = %e, "Internal server error");
                let body = Json(ErrorResponse {
                    error: GENERIC_ERROR.to_string(),
                });
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

/// Build the router with CORS open to every origin
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    let state = AppState { coordinator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and serve until Ctrl-C
pub async fn run_server(coordinator: Arc<Coordinator>, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}", addr);

    let app = router(coordinator);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start HTTP server: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler
async fn health() -> impl IntoResponse {
    "Avatar chat daemon is running"
}

/// Handler for chat requests.
///
/// An empty body counts as a request without a message.
async fn handle_chat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DialogueReply>, ApiError> {
    let request: ChatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ChatRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    state
        .coordinator
        .respond(request.message.as_deref())
        .await
        .map(Json)
        .map_err(ApiError::Internal)
}
