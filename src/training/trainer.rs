//! Supervised training pipeline
//!
//! A plain Burn training loop: Adam with cross-entropy, per-epoch validation,
//! reduce-on-plateau on validation loss, and the best checkpoint (by
//! validation accuracy) kept on disk. After training the best checkpoint is
//! reloaded and scored on the held-out test split.
//!
//! Files written to the output directory:
//! - `class_names.json`, `label_encoder.json`
//! - `efficientnet_plant_disease.mpk` and its `.json` metadata sidecar
//! - `splits.json`, `training_config.json`, `training_history.json`
//! - `test_metrics.json`, `classification_report.txt`
//! - `training_history.svg`, `confusion_matrix.svg`, `confusion_matrix.json`

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::CompactRecorder;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::burn_dataset::{PlantDiseaseBatch, PlantDiseaseBatcher, PlantDiseaseBurnDataset};
use crate::dataset::loader::{ImageSample, PlantDiseaseDataset};
use crate::dataset::split::DatasetSplits;
use crate::inference::preprocess::Preprocessor;
use crate::model::artifacts::{load_backbone, load_checkpoint, load_class_names, LabelEncoder};
use crate::model::config::{CheckpointMetadata, CLASS_NAMES_FILE, LABEL_ENCODER_FILE, MODEL_STEM};
use crate::model::efficientnet::{EfficientNet, EfficientNetConfig};
use crate::training::config::TrainingConfig;
use crate::training::scheduler::{PlateauMode, ReduceOnPlateau};
use crate::utils::charts::{self, DataSeries, Panel, YScale, COLOR_PRIMARY, COLOR_SECONDARY};
use crate::utils::error::{PlantDiseaseError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{Metrics, RunningAverage};

/// One row of the training history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    /// Record with the highest validation accuracy (earliest on ties)
    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Accuracy and loss curves, train against validation
    pub fn chart(&self) -> String {
        let series = |name: &str, color: &'static str, value: fn(&EpochRecord) -> f64| {
            let points = self.epochs.iter().map(|r| (r.epoch as f64, value(r))).collect();
            DataSeries::new(name, points, color)
        };
        let accuracy = [
            series("Train", COLOR_PRIMARY, |r| r.train_accuracy * 100.0),
            series("Validation", COLOR_SECONDARY, |r| r.val_accuracy * 100.0),
        ];
        let loss = [
            series("Train", COLOR_PRIMARY, |r| r.train_loss),
            series("Validation", COLOR_SECONDARY, |r| r.val_loss),
        ];

        charts::line_panels(&[
            Panel {
                title: "Model Accuracy",
                x_label: "Epoch",
                y_label: "Accuracy (%)",
                series: &accuracy,
                scale: YScale::Percent,
            },
            Panel {
                title: "Model Loss",
                x_label: "Epoch",
                y_label: "Loss",
                series: &loss,
                scale: YScale::Auto,
            },
        ])
    }
}

/// `confusion_matrix.json`: rows are true classes, columns predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrixFile {
    pub classes: Vec<String>,
    pub matrix: Vec<Vec<usize>>,
}

/// Headline numbers written to `test_metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub test_accuracy: f64,
    pub test_precision: f64,
    pub test_recall: f64,
    pub test_f1_score: f64,
}

impl From<&Metrics> for TestMetrics {
    fn from(metrics: &Metrics) -> Self {
        Self {
            test_accuracy: metrics.accuracy,
            test_precision: metrics.weighted_precision,
            test_recall: metrics.weighted_recall,
            test_f1_score: metrics.weighted_f1,
        }
    }
}

/// Outcome of [`run_training`]
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub checkpoint: PathBuf,
    pub best_epoch: usize,
    pub best_val_accuracy: f64,
    pub test_metrics: Option<Metrics>,
    pub history: TrainingHistory,
}

/// Predictions and mean loss over a dataset
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub loss: f64,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        if self.targets.is_empty() {
            return 0.0;
        }
        let correct = self
            .predictions
            .iter()
            .zip(&self.targets)
            .filter(|(p, t)| p == t)
            .count();
        correct as f64 / self.targets.len() as f64
    }

    pub fn metrics(&self, class_names: &[String]) -> Result<Metrics> {
        Ok(Metrics::from_predictions(&self.predictions, &self.targets, class_names.len())?
            .with_class_names(class_names))
    }
}

fn tensor_to_labels<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| PlantDiseaseError::Training(format!("reading tensor data: {:?}", e)))?;
    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
}

fn load_batch<B: Backend>(
    dataset: &PlantDiseaseBurnDataset,
    indices: &[usize],
    batcher: &PlantDiseaseBatcher,
    device: &B::Device,
) -> Option<PlantDiseaseBatch<B>> {
    let items: Vec<_> = indices.iter().filter_map(|&i| dataset.get(i)).collect();
    if items.is_empty() {
        return None;
    }
    Some(batcher.batch(items, device))
}

/// Run the model over a dataset without gradients
pub fn evaluate<B: Backend>(
    model: &EfficientNet<B>,
    dataset: &PlantDiseaseBurnDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    let batcher = PlantDiseaseBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let indices: Vec<usize> = (0..dataset.len()).collect();

    let mut loss = RunningAverage::new();
    let mut evaluation = Evaluation::default();

    for chunk in indices.chunks(batch_size.max(1)) {
        let Some(batch) = load_batch::<B>(dataset, chunk, &batcher, device) else {
            continue;
        };
        let n = batch.targets.dims()[0];

        let output = model.forward(batch.images);
        let batch_loss: f64 = loss_fn
            .forward(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        for _ in 0..n {
            loss.add(batch_loss);
        }

        let predictions = output.argmax(1).reshape([n]);
        evaluation.predictions.extend(tensor_to_labels(predictions)?);
        evaluation.targets.extend(tensor_to_labels(batch.targets)?);
    }

    evaluation.loss = loss.average();
    Ok(evaluation)
}

/// One pass over the training set; returns the updated model, mean loss and accuracy
fn train_epoch<B, O>(
    mut model: EfficientNet<B>,
    optimizer: &mut O,
    dataset: &PlantDiseaseBurnDataset,
    batch_size: usize,
    learning_rate: f64,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> (EfficientNet<B>, f64, f64)
where
    B: AutodiffBackend,
    O: Optimizer<EfficientNet<B>, B>,
{
    let batcher = PlantDiseaseBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    indices.shuffle(rng);
    let num_batches = indices.len().div_ceil(batch_size.max(1));

    let mut epoch_loss = RunningAverage::new();
    let mut correct = 0usize;
    let mut seen = 0usize;

    for (batch_idx, chunk) in indices.chunks(batch_size.max(1)).enumerate() {
        let Some(batch) = load_batch::<B>(dataset, chunk, &batcher, device) else {
            continue;
        };
        let n = batch.targets.dims()[0];

        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();
        epoch_loss.add(loss_value);

        let batch_correct: i64 = output
            .argmax(1)
            .reshape([n])
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += batch_correct as usize;
        seen += n;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(learning_rate, model, grads);

        if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
            debug!(
                "  Batch {:>4}/{}: loss = {:.4}, acc = {:.2}%",
                batch_idx + 1,
                num_batches,
                loss_value,
                100.0 * correct as f64 / seen.max(1) as f64
            );
        }
    }

    let accuracy = if seen > 0 { correct as f64 / seen as f64 } else { 0.0 };
    (model, epoch_loss.average(), accuracy)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text)?;
    Ok(())
}

/// Train an EfficientNet-B3 on a class-folder dataset
pub fn run_training<B: AutodiffBackend>(
    data_dir: &Path,
    output_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    std::fs::create_dir_all(output_dir)?;

    let mut dataset = PlantDiseaseDataset::new(data_dir)?;
    let skipped = dataset.drop_unreadable();
    if skipped > 0 {
        warn!("Skipped {} unreadable images", skipped);
    }
    if let Some(max) = config.max_samples {
        dataset.truncate_random(max, config.seed);
    }
    if dataset.is_empty() {
        return Err(PlantDiseaseError::Dataset(format!("no images found in {:?}", data_dir)));
    }

    let class_names = dataset.class_names.clone();
    let num_classes = class_names.len();
    write_text(
        &output_dir.join(CLASS_NAMES_FILE),
        &serde_json::to_string_pretty(&class_names)?,
    )?;
    LabelEncoder::fit(&class_names).save(&output_dir.join(LABEL_ENCODER_FILE))?;
    config.save(&output_dir.join("training_config.json"))?;

    let splits = DatasetSplits::stratified(&dataset.samples, &class_names, config.split_config())?;
    splits.save(&output_dir.join("splits.json"))?;
    if splits.train.is_empty() {
        return Err(PlantDiseaseError::Dataset("training split is empty".to_string()));
    }

    let preprocessor = Preprocessor::new(config.image_size);
    let build = |samples: &[ImageSample]| {
        if config.cache_images {
            let pairs = samples.iter().map(|s| (s.path.clone(), s.label)).collect();
            PlantDiseaseBurnDataset::new_cached(pairs, preprocessor)
        } else {
            PlantDiseaseBurnDataset::from_samples(samples, preprocessor)
        }
    };
    let train_set = build(&splits.train);
    let val_set = build(&splits.validation);
    let test_set = build(&splits.test);

    info!(
        "Training on {} images, validating on {}, testing on {} ({} classes)",
        train_set.len(),
        val_set.len(),
        test_set.len(),
        num_classes
    );

    let mut model = match &config.backbone {
        Some(path) => {
            info!("Initialising feature extractor from {:?}", path);
            load_backbone::<B>(path, num_classes, device)?
        }
        None => EfficientNet::<B>::new(&EfficientNetConfig::b3(num_classes), device),
    };

    let mut optimizer = AdamConfig::new().init::<B, EfficientNet<B>>();
    let mut scheduler = ReduceOnPlateau::new(
        config.learning_rate,
        config.plateau_factor,
        config.plateau_patience,
        config.min_learning_rate,
        PlateauMode::Min,
    );
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut logger = TrainingLogger::new(config.epochs);
    let mut history = TrainingHistory::default();

    let checkpoint = output_dir.join(MODEL_STEM);
    let mut best_val_accuracy = f64::NEG_INFINITY;
    let mut best_epoch = 0usize;

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);
        let lr = scheduler.lr();

        let (trained, train_loss, train_accuracy) = train_epoch(
            model,
            &mut optimizer,
            &train_set,
            config.batch_size,
            lr,
            &mut rng,
            device,
        );
        model = trained;

        let validation = if val_set.is_empty() {
            Evaluation::default()
        } else {
            evaluate(&model.valid(), &val_set, config.batch_size, device)?
        };
        let val_accuracy = validation.accuracy();

        logger.end_epoch(train_loss, validation.loss, val_accuracy, lr);
        history.push(EpochRecord {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            val_loss: validation.loss,
            val_accuracy,
            learning_rate: lr,
        });

        if val_accuracy > best_val_accuracy {
            best_val_accuracy = val_accuracy;
            best_epoch = epoch + 1;
            model
                .clone()
                .save_file(checkpoint.clone(), &CompactRecorder::new())
                .map_err(|e| PlantDiseaseError::Model(format!("Failed to save model: {:?}", e)))?;
            CheckpointMetadata::new(num_classes, best_epoch, val_accuracy).save(&checkpoint)?;
            logger.log_new_best(val_accuracy);
        }

        let next_lr = scheduler.step(validation.loss);
        if next_lr < lr {
            logger.log_lr_reduced(lr, next_lr);
        }
    }

    history.save(&output_dir.join("training_history.json"))?;
    charts::write_svg(&output_dir.join("training_history.svg"), &history.chart())?;
    logger.log_complete(best_val_accuracy);

    let test_metrics = if test_set.is_empty() {
        warn!("Test split is empty, skipping final evaluation");
        None
    } else {
        let best = load_checkpoint::<B::InnerBackend>(&checkpoint, num_classes, device)?;
        let metrics = evaluate(&best, &test_set, config.batch_size, device)?.metrics(&class_names)?;

        let summary = TestMetrics::from(&metrics);
        write_text(
            &output_dir.join("test_metrics.json"),
            &serde_json::to_string_pretty(&summary)?,
        )?;
        write_text(
            &output_dir.join("classification_report.txt"),
            &metrics.classification_report(),
        )?;
        let matrix_file = ConfusionMatrixFile {
            classes: class_names.clone(),
            matrix: metrics.confusion_matrix.rows(),
        };
        write_text(
            &output_dir.join("confusion_matrix.json"),
            &serde_json::to_string_pretty(&matrix_file)?,
        )?;
        charts::write_svg(
            &output_dir.join("confusion_matrix.svg"),
            &charts::confusion_matrix_chart(&metrics.confusion_matrix, &class_names),
        )?;
        info!(
            "Test accuracy {:.2}% | weighted F1 {:.4}",
            summary.test_accuracy * 100.0,
            summary.test_f1_score
        );
        Some(metrics)
    };

    Ok(TrainingReport {
        checkpoint,
        best_epoch,
        best_val_accuracy,
        test_metrics,
        history,
    })
}

/// Score a saved checkpoint on every image of a dataset directory
///
/// The dataset's class folders must match the checkpoint's class list.
pub fn evaluate_checkpoint<B: Backend>(
    checkpoint: &Path,
    class_names_path: &Path,
    data_dir: &Path,
    batch_size: usize,
    device: &B::Device,
) -> Result<Metrics> {
    let class_names = load_class_names(class_names_path)?;
    let mut dataset = PlantDiseaseDataset::new(data_dir)?;
    if dataset.class_names != class_names {
        return Err(PlantDiseaseError::Dataset(format!(
            "dataset classes ({}) do not match the model's class list ({})",
            dataset.num_classes(),
            class_names.len()
        )));
    }
    dataset.drop_unreadable();

    let model = load_checkpoint::<B>(checkpoint, class_names.len(), device)?;
    let eval_set = PlantDiseaseBurnDataset::from_samples(&dataset.samples, Preprocessor::default());

    evaluate(&model, &eval_set, batch_size, device)?.metrics(&class_names)
}
