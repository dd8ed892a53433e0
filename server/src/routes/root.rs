//! Service metadata endpoint and the JSON fallbacks

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

#[derive(Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub classes: &'static str,
    pub predict: &'static str,
    pub predict_batch: &'static str,
}

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub framework: &'static str,
    pub endpoints: Endpoints,
}

/// GET / - API information
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Plant Disease Detection API",
        version: plant_disease::VERSION,
        framework: "Burn + EfficientNet-B3",
        endpoints: Endpoints {
            health: "/health",
            classes: "/classes",
            predict: "/predict",
            predict_batch: "/predict/batch",
        },
    })
}

/// Any unknown route
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Endpoint not found" })),
    )
        .into_response()
}

/// Response for a handler that panicked
pub fn internal_error(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "message": "Internal server error" })),
    )
        .into_response()
}
