//! Plant Disease Classification CLI
//!
//! Entry point for training, evaluating and trying out the EfficientNet-B3
//! plant disease classifier from the command line.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use plant_disease::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use plant_disease::inference::{InferenceService, ServiceConfig};
use plant_disease::model::config::checkpoint_file;
use plant_disease::model::{load_artifacts, ArtifactPaths, ArtifactState};
use plant_disease::training::{evaluate_checkpoint, run_training, TrainingConfig};
use plant_disease::utils::format_duration;
use plant_disease::utils::logging::{init_logging, LogConfig};
use plant_disease::PlantDiseaseDataset;

/// Plant disease classification with EfficientNet-B3
///
/// Trains the classifier on a `root/<class_name>/*.jpg` dataset and runs the
/// same prediction pipeline the HTTP server uses.
#[derive(Parser, Debug)]
#[command(name = "plant_disease")]
#[command(version = plant_disease::VERSION)]
#[command(about = "Plant disease classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train EfficientNet-B3 on a class-folder dataset
    Train {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/plant_disease")]
        data_dir: PathBuf,

        /// Output directory for the checkpoint, class list and reports
        #[arg(short, long, default_value = "models")]
        output_dir: PathBuf,

        /// JSON training configuration; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,

        /// Use at most this many images (random subset)
        #[arg(long)]
        max_samples: Option<usize>,

        /// Initialise the feature extractor from a backbone record
        #[arg(long)]
        backbone: Option<PathBuf>,

        /// Preprocess all images into memory up front
        #[arg(long, default_value = "false")]
        cache: bool,
    },

    /// Evaluate a saved checkpoint on a dataset directory
    Evaluate {
        /// Model directory written by `train`
        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,

        /// Path to the dataset directory
        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Run one image through the prediction pipeline
    Infer {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Model directory written by `train`
        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,

        /// Optional JSON service configuration
        #[arg(long)]
        service_config: Option<PathBuf>,
    },

    /// Show dataset statistics
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/plant_disease")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::cli(cli.verbose));

    print_banner();

    match cli.command {
        Commands::Train {
            data_dir,
            output_dir,
            config,
            epochs,
            batch_size,
            learning_rate,
            seed,
            max_samples,
            backbone,
            cache,
        } => {
            let mut training_config = match config {
                Some(path) => TrainingConfig::load(&path)
                    .with_context(|| format!("reading training config {:?}", path))?,
                None => TrainingConfig::default(),
            };
            if let Some(epochs) = epochs {
                training_config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training_config.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                training_config.learning_rate = lr;
            }
            if let Some(seed) = seed {
                training_config.seed = seed;
            }
            if max_samples.is_some() {
                training_config.max_samples = max_samples;
            }
            if backbone.is_some() {
                training_config.backbone = backbone;
            }
            training_config.cache_images |= cache;

            cmd_train(&data_dir, &output_dir, &training_config)?;
        }

        Commands::Evaluate {
            model_dir,
            data_dir,
            batch_size,
        } => {
            cmd_evaluate(&model_dir, &data_dir, batch_size)?;
        }

        Commands::Infer {
            input,
            model_dir,
            service_config,
        } => {
            cmd_infer(&input, &model_dir, service_config.as_deref())?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
  ==================================================
    Plant Disease Classification
    EfficientNet-B3 with Burn + Rust
  ==================================================
  "#
        .green()
    );
}

fn cmd_train(data_dir: &Path, output_dir: &Path, config: &TrainingConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Dataset:       {}", data_dir.display());
    println!("  Output:        {}", output_dir.display());
    println!("  Backend:       {}", backend_name());
    println!("  Epochs:        {}", config.epochs);
    println!("  Batch size:    {}", config.batch_size);
    println!("  Learning rate: {}", config.learning_rate);
    println!("  Image size:    {}", config.image_size);
    println!();

    let started = std::time::Instant::now();
    let device = default_device();
    let report = run_training::<TrainingBackend>(data_dir, output_dir, config, &device)?;

    println!();
    println!("{}", "Training complete".green().bold());
    println!("  Checkpoint:    {}", report.checkpoint.display());
    println!(
        "  Best epoch:    {} ({:.2}% validation accuracy)",
        report.best_epoch,
        report.best_val_accuracy * 100.0
    );
    if let Some(metrics) = &report.test_metrics {
        println!("  Test accuracy: {:.2}%", metrics.accuracy * 100.0);
        println!("  Test F1:       {:.4}", metrics.weighted_f1);
    }
    println!("  Duration:      {}", format_duration(started.elapsed()));

    Ok(())
}

fn cmd_evaluate(model_dir: &Path, data_dir: &Path, batch_size: usize) -> Result<()> {
    let paths = ArtifactPaths::in_dir(model_dir);
    info!("Evaluating {:?} on {:?}", checkpoint_file(&paths.checkpoint), data_dir);

    let device = default_device();
    let metrics = evaluate_checkpoint::<DefaultBackend>(
        &paths.checkpoint,
        &paths.class_names,
        data_dir,
        batch_size,
        &device,
    )?;

    println!("{}", "Evaluation Results:".cyan().bold());
    println!("{}", metrics.classification_report());

    Ok(())
}

fn cmd_infer(input: &Path, model_dir: &Path, service_config: Option<&Path>) -> Result<()> {
    if !input.exists() {
        bail!("Input image not found: {}", input.display());
    }

    let config = match service_config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    println!("{}", "Loading model...".cyan());
    let device = default_device();
    let state = load_artifacts::<DefaultBackend>(&ArtifactPaths::in_dir(model_dir), &device);
    if let ArtifactState::NotLoaded { reason } = &state {
        bail!("Model not loaded: {}", reason);
    }
    let service = InferenceService::new(state, config);

    let bytes = std::fs::read(input)?;
    let content_type = guess_content_type(input, &bytes);
    if content_type.is_none() {
        bail!(
            "Unrecognised image format: {} (supported: JPEG, PNG, BMP, WebP)",
            input.display()
        );
    }

    let started = std::time::Instant::now();
    let outcome = service.predict_single(&bytes, content_type);
    let elapsed = started.elapsed();

    println!(
        "{}",
        input.file_name().unwrap_or_default().to_string_lossy().bold()
    );
    match outcome {
        Ok(response) => {
            println!("  Predicted:  {}", response.prediction.green().bold());
            println!("  Confidence: {:.1}%", response.confidence * 100.0);
            println!("  {}", response.message.yellow());
            println!("  Time:       {:.2}ms", elapsed.as_secs_f64() * 1000.0);
            println!("  Top-{}:", response.all_predictions.len());
            for (i, item) in response.all_predictions.iter().enumerate() {
                println!("    {}. {} ({:.1}%)", i + 1, item.class_name, item.confidence * 100.0);
            }
        }
        Err(e) => {
            println!("  {} {}", "Rejected:".red(), e);
        }
    }

    Ok(())
}

/// Content type from the file's magic bytes, else from its extension
fn guess_content_type(path: &Path, bytes: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        return Some(format.to_mime_type());
    }

    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    let dataset = PlantDiseaseDataset::new(data_dir)?;
    dataset.stats().print();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(4, 4, image::Rgb([30, 140, 40]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_content_type_sniffed_from_bytes() {
        let bytes = png_bytes();
        assert_eq!(guess_content_type(Path::new("leaf.upload"), &bytes), Some("image/png"));
        assert_eq!(guess_content_type(Path::new("leaf"), &bytes), Some("image/png"));
    }

    #[test]
    fn test_content_type_falls_back_to_extension() {
        assert_eq!(guess_content_type(Path::new("leaf.JPG"), b"????"), Some("image/jpeg"));
        assert_eq!(guess_content_type(Path::new("notes.txt"), b"plain text"), None);
    }
}
