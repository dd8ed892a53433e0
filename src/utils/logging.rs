//! Logging setup
//!
//! Structured logging via `tracing`. The CLI and the HTTP server differ only in
//! verbosity and whether output is colored; both install their subscriber
//! through [`init_logging`].

use std::time::Instant;

use tracing::Level;

use crate::utils::error::{PlantDiseaseError, Result};
use crate::utils::format_duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
    /// Prefix lines with the module path
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub ansi: bool,
}

impl LogConfig {
    /// Interactive use: colored, module paths only when verbose
    pub fn cli(verbose: bool) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::INFO },
            show_target: verbose,
            show_thread_ids: false,
            ansi: true,
        }
    }

    /// Long-running server: plain text, request spans keep their target
    pub fn server(verbose: bool) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::INFO },
            show_target: true,
            show_thread_ids: verbose,
            ansi: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::cli(false)
    }
}

/// Install the global subscriber; fails if one is already set
pub fn init_logging(config: &LogConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(config.level)
        .with_ansi(config.ansi)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .compact()
        .try_init()
        .map_err(|e| PlantDiseaseError::Config(format!("logging already initialised: {}", e)))
}

/// Per-epoch summaries for the training loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        let now = Instant::now();
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: now,
            training_start: now,
        }
    }

    /// `epoch` is zero-based; logs show it one-based
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("epoch {}/{}", epoch + 1, self.total_epochs);
    }

    fn eta(&self) -> std::time::Duration {
        let done = (self.epoch + 1) as u32;
        let left = self.total_epochs.saturating_sub(self.epoch + 1) as u32;
        self.training_start.elapsed() / done * left
    }

    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_accuracy: f64, learning_rate: f64) {
        tracing::info!(
            "[{}/{}] train_loss={:.4} val_loss={:.4} val_acc={:.2}% lr={:.2e} ({}, eta {})",
            self.epoch + 1,
            self.total_epochs,
            train_loss,
            val_loss,
            val_accuracy * 100.0,
            learning_rate,
            format_duration(self.epoch_start.elapsed()),
            format_duration(self.eta())
        );
    }

    pub fn log_new_best(&self, accuracy: f64) {
        tracing::info!("checkpoint saved (val_acc={:.2}%)", accuracy * 100.0);
    }

    pub fn log_lr_reduced(&self, from: f64, to: f64) {
        tracing::info!("val_loss plateaued, lr {:.2e} -> {:.2e}", from, to);
    }

    pub fn log_complete(&self, best_accuracy: f64) {
        tracing::info!(
            "finished {} epochs in {}, best val_acc={:.2}%",
            self.total_epochs,
            format_duration(self.training_start.elapsed()),
            best_accuracy * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let cli = LogConfig::cli(false);
        assert_eq!(cli.level, Level::INFO);
        assert!(cli.ansi);
        assert!(!cli.show_target);

        let server = LogConfig::server(true);
        assert_eq!(server.level, Level::DEBUG);
        assert!(!server.ansi);
        assert!(server.show_target);

        assert_eq!(LogConfig::default(), LogConfig::cli(false));
    }

    #[test]
    fn test_training_logger_tracks_epoch() {
        let mut logger = TrainingLogger::new(3);
        logger.start_epoch(1);
        assert_eq!(logger.epoch, 1);
        logger.end_epoch(0.9, 1.1, 0.5, 1e-3);
        logger.log_complete(0.5);
    }
}
