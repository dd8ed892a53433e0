//! Application state for the prediction server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use plant_disease::inference::InferenceService;
use plant_disease::model::{ArtifactPaths, FallbackPolicy};

/// Server configuration resolved from the CLI and environment
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub artifacts: ArtifactPaths,
    /// Optional JSON `ServiceConfig`
    pub service_config: Option<PathBuf>,
    /// Per-file upload limit in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactPaths::default(),
            service_config: None,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn with_fallback(mut self, backbone: Option<PathBuf>) -> Self {
        self.artifacts.fallback = match backbone {
            Some(path) => FallbackPolicy::PretrainedBackbone { path },
            None => FallbackPolicy::Disabled,
        };
        self
    }
}

/// Shared application state
pub struct AppState {
    pub service: InferenceService,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: InferenceService) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
