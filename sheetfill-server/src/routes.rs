//! HTTP routes

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sheetfill_core::{CalculationInput, DocumentConverter, ReportError, ReportService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    /// Archive base name; sanitized by the service
    pub name: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Request failure mapped onto an HTTP status
#[derive(Debug)]
pub enum ApiError {
    Report(ReportError),
    /// The blocking generation task panicked or was cancelled
    Task(String),
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        ApiError::Report(err)
    }
}

/// HTTP status for a pipeline error
pub fn status_for(err: &ReportError) -> StatusCode {
    match err {
        ReportError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReportError::ConversionFailed { .. } => StatusCode::BAD_GATEWAY,
        ReportError::ConversionTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        ReportError::SymbolNotFound(_)
        | ReportError::Packaging(_)
        | ReportError::Config(_)
        | ReportError::Template(_)
        | ReportError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Report(err) => (status_for(&err), format!("{:#}", anyhow::Error::from(err))),
            ApiError::Task(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "report request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "report request rejected");
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub fn create_router<C: DocumentConverter + 'static>(service: Arc<ReportService<C>>) -> Router {
    Router::new()
        .route("/generate-excel-pdf", post(generate_report::<C>))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(service)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn generate_report<C: DocumentConverter + 'static>(
    State(service): State<Arc<ReportService<C>>>,
    Query(query): Query<GenerateQuery>,
    Json(input): Json<CalculationInput>,
) -> Result<Response, ApiError> {
    let archive = tokio::task::spawn_blocking(move || service.generate(&input, query.name.as_deref()))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, archive.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.bytes,
    )
        .into_response())
}
