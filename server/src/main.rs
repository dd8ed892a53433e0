//! Plant Disease Prediction Server
//!
//! HTTP API serving EfficientNet-B3 plant disease predictions. Model artifacts
//! are loaded once at startup; if loading fails the server still starts and
//! reports `model_not_loaded` until restarted with valid artifacts.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use plant_disease::backend::{backend_name, default_device, DefaultBackend};
use plant_disease::inference::{InferenceService, ServiceConfig};
use plant_disease::model::{load_artifacts, ArtifactPaths};
use plant_disease::utils::logging::{init_logging, LogConfig};

use crate::state::{AppState, ServerConfig, SharedState};

/// Plant Disease Prediction Server
#[derive(Parser, Debug)]
#[command(name = "plant-disease-server")]
#[command(version = plant_disease::VERSION)]
#[command(about = "HTTP API serving plant disease predictions")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PLANT_PORT", default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "PLANT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Checkpoint path without the `.mpk` extension
    #[arg(long, env = "PLANT_MODEL_PATH", default_value = "models/efficientnet_plant_disease")]
    model_path: PathBuf,

    /// JSON array of class names
    #[arg(long, env = "PLANT_CLASS_NAMES_PATH", default_value = "models/class_names.json")]
    class_names_path: PathBuf,

    /// Optional label encoder written by training
    #[arg(long, env = "PLANT_LABEL_ENCODER_PATH", default_value = "models/label_encoder.json")]
    label_encoder_path: Option<PathBuf>,

    /// Backbone record to fall back to when the checkpoint fails to load
    #[arg(long, env = "PLANT_FALLBACK_BACKBONE")]
    fallback_backbone: Option<PathBuf>,

    /// JSON service configuration (thresholds, top-k, batch size)
    #[arg(long, env = "PLANT_SERVICE_CONFIG")]
    service_config: Option<PathBuf>,

    /// Per-file upload limit in megabytes
    #[arg(long, env = "PLANT_MAX_UPLOAD_MB", default_value = "10")]
    max_upload_mb: usize,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            artifacts: ArtifactPaths {
                checkpoint: self.model_path.clone(),
                class_names: self.class_names_path.clone(),
                label_encoder: self.label_encoder_path.clone(),
                ..ArtifactPaths::default()
            },
            service_config: self.service_config.clone(),
            max_upload_bytes: self.max_upload_mb * 1024 * 1024,
        }
        .with_fallback(self.fallback_backbone.clone())
    }
}

/// Build the router; the body limit covers a full batch of maximum-size files
fn app(state: SharedState, max_upload_bytes: usize) -> Router {
    let body_limit = max_upload_bytes.saturating_mul(state.service.config().max_batch_files);

    Router::new()
        .route("/", get(routes::root::root))
        .route("/health", get(routes::health::health_check))
        .route("/classes", get(routes::classes::get_classes))
        .route("/predict", post(routes::predict::predict))
        .route("/predict/batch", post(routes::predict::predict_batch))
        .fallback(routes::root::not_found)
        .with_state(state)
        // enforced while the multipart body is read, so overflows surface as `ApiError`
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(routes::root::internal_error))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::server(cli.verbose));

    let config = cli.server_config();

    info!("Plant Disease Prediction Server v{}", plant_disease::VERSION);
    info!("Configuration:");
    info!("  Checkpoint:  {:?}", config.artifacts.checkpoint);
    info!("  Class names: {:?}", config.artifacts.class_names);
    info!("  Encoder:     {:?}", config.artifacts.label_encoder);
    info!("  Fallback:    {:?}", config.artifacts.fallback);
    info!("  Backend:     {}", backend_name());

    let service_config = match &config.service_config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    let artifacts = config.artifacts.clone();
    let artifact_state = tokio::task::spawn_blocking(move || {
        load_artifacts::<DefaultBackend>(&artifacts, &default_device())
    })
    .await?;
    if !artifact_state.is_ready() {
        warn!("Serving without a model; prediction endpoints will return 503");
    }

    let state = Arc::new(AppState::new(InferenceService::new(artifact_state, service_config)));
    let app = app(state, config.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::Value;
    use tower::ServiceExt;

    use plant_disease::inference::{Classifier, InputTensor, PredictionError};
    use plant_disease::model::{ArtifactState, ModelArtifact, WeightsSource};

    const BOUNDARY: &str = "plant-disease-test-boundary";
    const LIMIT: usize = 10 * 1024 * 1024;

    struct FixedClassifier {
        logits: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    impl Classifier for FixedClassifier {
        fn num_classes(&self) -> usize {
            self.logits.len()
        }

        fn logits(&self, _input: &InputTensor) -> Result<Vec<f32>, PredictionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.logits.clone())
        }
    }

    fn class_names() -> Vec<String> {
        vec![
            "Tomato___Early_blight".to_string(),
            "Tomato___Late_blight".to_string(),
            "Tomato___healthy".to_string(),
        ]
    }

    fn ready_app() -> (Router, Arc<AtomicUsize>) {
        ready_app_with_limit(LIMIT)
    }

    fn ready_app_with_limit(max_upload_bytes: usize) -> (Router, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = FixedClassifier {
            logits: vec![4.0, 0.0, 0.0],
            calls: calls.clone(),
        };
        let artifact =
            ModelArtifact::new(Box::new(classifier), class_names(), WeightsSource::Custom).unwrap();
        let service = InferenceService::new(ArtifactState::Ready(artifact), ServiceConfig::default());
        (app(Arc::new(AppState::new(service)), max_upload_bytes), calls)
    }

    fn unloaded_app() -> Router {
        let service = InferenceService::new(
            ArtifactState::not_loaded("checkpoint missing"),
            ServiceConfig::default(),
        );
        app(Arc::new(AppState::new(service)), LIMIT)
    }

    fn leaf_png() -> Vec<u8> {
        let img = RgbImage::from_fn(128, 128, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([30, 120, 30])
            } else {
                Rgb([90, 220, 70])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// (field, filename, content type, bytes)
    fn multipart(parts: &[(&str, &str, &str, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, filename, content_type, bytes) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    field, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_without_model() {
        let (status, body) = send(unloaded_app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "model_not_loaded");
        assert_eq!(body["model_loaded"], false);
        assert_eq!(body["num_classes"], 0);
        assert_eq!(body["device"], "none");
    }

    #[tokio::test]
    async fn test_health_with_model() {
        let (app, _) = ready_app();
        let (status, body) = send(app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["num_classes"], 3);
        assert_eq!(body["weights"], "custom");
    }

    #[tokio::test]
    async fn test_classes() {
        let (status, body) = send(unloaded_app(), get("/classes")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "model_not_loaded");

        let (app, _) = ready_app();
        let (status, body) = send(app, get("/classes")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["num_classes"], 3);
        assert_eq!(body["classes"][2], "Tomato___healthy");
    }

    #[tokio::test]
    async fn test_predict_without_model() {
        let body = multipart(&[("file", "leaf.png", "image/png", leaf_png())]);
        let (status, body) = send(unloaded_app(), post("/predict", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_predict_leaf() {
        let (app, calls) = ready_app();
        let body = multipart(&[("file", "leaf.png", "image/png", leaf_png())]);
        let (status, body) = send(app, post("/predict", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["prediction"], "Tomato___Early_blight");
        assert_eq!(body["all_predictions"].as_array().unwrap().len(), 3);
        assert_eq!(body["message"], "Prediction successful");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predict_rejects_non_image() {
        let (app, calls) = ready_app();
        let body = multipart(&[("file", "notes.txt", "text/plain", b"hello".to_vec())]);
        let (status, body) = send(app, post("/predict", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "unsupported_content_type");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_a_json_error() {
        // ten files of 1 KiB each fit; one 64 KiB file does not
        let (app, calls) = ready_app_with_limit(1024);
        let body = multipart(&[("file", "huge.png", "image/png", vec![0u8; 64 * 1024])]);
        let (status, body) = send(app, post("/predict", body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "payload_too_large");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_a_json_error() {
        let (app, calls) = ready_app();
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"file": "leaf.png"}"#))
            .unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "invalid_request");
        assert!(body["message"].is_string());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predict_missing_file() {
        let (app, _) = ready_app();
        let body = multipart(&[("other", "leaf.png", "image/png", leaf_png())]);
        let (status, body) = send(app, post("/predict", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_file");
    }

    #[tokio::test]
    async fn test_batch_too_many_files() {
        let (app, calls) = ready_app();
        let parts: Vec<_> = (0..11)
            .map(|i| ("files", format!("leaf_{}.png", i), "image/png", leaf_png()))
            .collect();
        let parts: Vec<_> = parts
            .iter()
            .map(|(f, n, c, b)| (*f, n.as_str(), *c, b.clone()))
            .collect();
        let (status, body) = send(app, post("/predict/batch", multipart(&parts))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "too_many_files");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_isolates_corrupt_file() {
        let (app, calls) = ready_app();
        let body = multipart(&[
            ("files", "a.png", "image/png", leaf_png()),
            ("files", "broken.png", "image/png", b"not an image".to_vec()),
            ("files", "c.png", "image/png", leaf_png()),
        ]);
        let (status, body) = send(app, post("/predict/batch", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_images"], 3);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["filename"], "a.png");
        assert_eq!(results[0]["success"], true);
        assert_eq!(results[0]["top_predictions"].as_array().unwrap().len(), 3);
        assert_eq!(results[1]["filename"], "broken.png");
        assert_eq!(results[1]["success"], false);
        assert!(results[1]["error"].is_string());
        assert!(results[1].get("prediction").is_none());
        assert_eq!(results[2]["success"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_without_model() {
        let body = multipart(&[("files", "a.png", "image/png", leaf_png())]);
        let (status, _) = send(unloaded_app(), post("/predict/batch", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_root_and_unknown_route() {
        let (status, body) = send(unloaded_app(), get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], plant_disease::VERSION);
        assert_eq!(body["endpoints"]["predict_batch"], "/predict/batch");

        let (status, body) = send(unloaded_app(), get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Endpoint not found");
    }
}
