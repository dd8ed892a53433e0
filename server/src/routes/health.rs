//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use plant_disease::inference::HealthReport;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub uptime_seconds: u64,
}

/// GET /health - readiness of the loaded model
///
/// Always 200; `status` is `"model_not_loaded"` when no artifact is ready.
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        report: state.service.health(),
        uptime_seconds: state.uptime_seconds(),
    })
}
