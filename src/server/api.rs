//! HTTP surface of the model server

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::errors::ServingError;
use crate::core::models::{InferenceRequest, InferenceResponse};
use crate::handler::TranslationHandler;

/// Application state
pub struct AppState {
    handler: TranslationHandler,
    model_name: String,
}

/// Health check response
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error payload
    pub error: ErrorDetail,
}

/// Error payload
#[derive(Serialize)]
pub struct ErrorDetail {
    /// Human readable message
    pub message: String,
    /// Machine readable code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: String, code: &str, kind: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message,
                code: Some(code.to_string()),
                r#type: Some(kind.to_string()),
            },
        }),
    )
}

/// Health check handler
async fn ping(State(state): State<Arc<AppState>>) -> Result<Json<PingResponse>, ApiError> {
    if !state.handler.is_ready() {
        return Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Model is not loaded".to_string(),
            "not_ready",
            "service_unavailable",
        ));
    }

    Ok(Json(PingResponse {
        status: "Healthy".to_string(),
    }))
}

/// Prediction handler
async fn predictions(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Json(payload): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
    if model != state.model_name {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("Model not found: {}", model),
            "model_not_found",
            "invalid_request_error",
        ));
    }

    match state.handler.handle(&payload.instances).await {
        Ok(predictions) => Ok(Json(InferenceResponse { predictions })),
        Err(e) => {
            warn!("Prediction failed: {}", e);
            let status = match e {
                ServingError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
                ServingError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(error(status, e.to_string(), "prediction_error", "api_error"))
        }
    }
}

/// Build the router serving `model_name` with an initialized handler
pub fn router(handler: TranslationHandler, model_name: impl Into<String>) -> Router {
    let state = Arc::new(AppState {
        handler,
        model_name: model_name.into(),
    });

    Router::new()
        .route("/ping", get(ping))
        .route("/predictions/:model", post(predictions))
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!("Serving on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the HTTP server
pub async fn run_server(
    handler: TranslationHandler,
    model_name: String,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, router(handler, model_name)).await
}
