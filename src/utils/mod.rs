//! Shared utilities: errors, logging, evaluation metrics and charts

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{PlantDiseaseError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, Metrics};

use std::time::Duration;

/// Compact `1h02m`, `3m07s` or `4.2s` rendering
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{:.1}s", duration.as_secs_f64()),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
