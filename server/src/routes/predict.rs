//! Prediction endpoints
//!
//! Handlers only collect the uploaded bytes; decoding, validation and the
//! forward pass run on the blocking pool through the library's
//! `InferenceService`.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use tracing::{debug, error};

use plant_disease::inference::{BatchResponse, PredictionError, PredictionResponse, UploadedFile};

use crate::error::ApiError;
use crate::state::SharedState;

/// Field name of the single-image upload
pub const FILE_FIELD: &str = "file";
/// Field name of each batch upload
pub const FILES_FIELD: &str = "files";

/// Read every file part of a multipart body, keeping upload order
async fn read_files(multipart: &mut Multipart, accepted: &[&str]) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if !accepted.contains(&name.as_str()) {
            debug!("Ignoring multipart field '{}'", name);
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        files.push(UploadedFile::new(filename, content_type.as_deref(), bytes.to_vec()));
    }

    Ok(files)
}

async fn run_blocking<T, F>(job: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, PredictionError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!("Inference task failed: {}", e);
            Err(PredictionError::Unexpected(e.to_string()).into())
        }
    }
}

/// POST /predict - classify one uploaded image
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    // readiness is reported before the upload is even read
    state.service.state().ready()?;
    let mut multipart = multipart?;

    let file = read_files(&mut multipart, &[FILE_FIELD])
        .await?
        .into_iter()
        .next()
        .ok_or(PredictionError::MissingFile)?;

    let response = run_blocking(move || {
        state
            .service
            .predict_single(&file.bytes, file.content_type.as_deref())
    })
    .await?;

    Ok(Json(response))
}

/// POST /predict/batch - classify up to `max_batch_files` images
pub async fn predict_batch(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    state.service.state().ready()?;
    let mut multipart = multipart?;

    let files = read_files(&mut multipart, &[FILES_FIELD, FILE_FIELD]).await?;

    let response = run_blocking(move || state.service.predict_batch(files)).await?;

    Ok(Json(response))
}
