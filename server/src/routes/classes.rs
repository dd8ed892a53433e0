//! Class list endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct ClassesResponse {
    pub success: bool,
    pub num_classes: usize,
    pub classes: Vec<String>,
}

/// GET /classes - ordered class names; 503 when no model is loaded
pub async fn get_classes(State(state): State<SharedState>) -> Result<Json<ClassesResponse>, ApiError> {
    let classes = state.service.classes()?;
    Ok(Json(ClassesResponse {
        success: true,
        num_classes: classes.len(),
        classes: classes.to_vec(),
    }))
}
