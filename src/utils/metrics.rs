//! Metrics Module for Model Evaluation
//!
//! Accuracy, per-class precision/recall/F1, macro and support-weighted
//! averages, confusion matrix, and a plain-text classification report.

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDiseaseError, Result};

/// Evaluation metrics over a labelled set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,

    /// Macro-averaged recall
    pub macro_recall: f64,

    /// Macro-averaged F1-score
    pub macro_f1: f64,

    /// Support-weighted precision
    pub weighted_precision: f64,

    /// Support-weighted recall
    pub weighted_recall: f64,

    /// Support-weighted F1-score
    pub weighted_f1: f64,

    /// Per-class metrics
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Compute metrics from predicted and ground-truth label indices
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(PlantDiseaseError::InvalidInput(format!(
                "{} predictions for {} ground-truth labels",
                predictions.len(),
                ground_truth.len()
            )));
        }

        let total_samples = predictions.len();
        if total_samples == 0 {
            return Ok(Self::default());
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let correct_predictions = confusion_matrix.correct();
        let accuracy = correct_predictions as f64 / total_samples as f64;

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| -> f64 {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|m| f(m)).sum::<f64>() / supported.len() as f64
            }
        };

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_avg = |f: fn(&ClassMetrics) -> f64| -> f64 {
            if total_support == 0 {
                0.0
            } else {
                per_class.iter().map(|m| f(m) * m.support as f64).sum::<f64>()
                    / total_support as f64
            }
        };

        let macro_precision = macro_avg(|m| m.precision);
        let macro_recall = macro_avg(|m| m.recall);
        let macro_f1 = macro_avg(|m| m.f1);
        let weighted_precision = weighted_avg(|m| m.precision);
        let weighted_recall = weighted_avg(|m| m.recall);
        let weighted_f1 = weighted_avg(|m| m.f1);

        Ok(Self {
            total_samples,
            correct_predictions,
            accuracy,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_precision,
            weighted_recall,
            weighted_f1,
            per_class,
            confusion_matrix,
        })
    }

    /// Attach class names to the per-class entries
    pub fn with_class_names(mut self, class_names: &[String]) -> Self {
        for entry in &mut self.per_class {
            entry.class_name = class_names.get(entry.class_idx).cloned();
        }
        self
    }

    /// Text classification report: one row per class, then averages
    pub fn classification_report(&self) -> String {
        let name_width = self
            .per_class
            .iter()
            .map(|m| m.label().len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        let mut out = String::new();
        out.push_str(&format!(
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            width = name_width
        ));

        for m in &self.per_class {
            out.push_str(&format!(
                "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9}\n",
                m.label(),
                m.precision,
                m.recall,
                m.f1,
                m.support,
                width = name_width
            ));
        }

        out.push('\n');
        out.push_str(&format!(
            "{:>width$} {:>9} {:>9} {:>9.4} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_samples,
            width = name_width
        ));
        out.push_str(&format!(
            "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9}\n",
            "macro avg",
            self.macro_precision,
            self.macro_recall,
            self.macro_f1,
            self.total_samples,
            width = name_width
        ));
        out.push_str(&format!(
            "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9}\n",
            "weighted avg",
            self.weighted_precision,
            self.weighted_recall,
            self.weighted_f1,
            self.total_samples,
            width = name_width
        ));

        out
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Accuracy:           {:6.2}%", self.accuracy * 100.0)?;
        writeln!(f, "Weighted precision: {:6.2}%", self.weighted_precision * 100.0)?;
        writeln!(f, "Weighted recall:    {:6.2}%", self.weighted_recall * 100.0)?;
        writeln!(f, "Weighted F1:        {:6.2}%", self.weighted_f1 * 100.0)?;
        writeln!(f, "Macro F1:           {:6.2}%", self.macro_f1 * 100.0)?;
        write!(f, "Total samples:      {}", self.total_samples)
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP)
    pub precision: f64,
    /// TP / (TP + FN)
    pub recall: f64,
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // predicted as this class, actually another
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // actually this class, predicted as another
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let support = true_positives + false_negatives;

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    fn label(&self) -> String {
        self.class_name
            .clone()
            .unwrap_or_else(|| self.class_idx.to_string())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Confusion matrix, rows = actual, columns = predicted, row-major
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Record one prediction; out-of-range labels are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// One row per true class
    pub fn rows(&self) -> Vec<Vec<usize>> {
        if self.num_classes == 0 {
            return Vec::new();
        }
        self.matrix.chunks(self.num_classes).map(<[usize]>::to_vec).collect()
    }
}

/// Running average for per-batch losses
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 1, 2, 0];
        let ground_truth = vec![0, 1, 2, 2, 1];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 1);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 1);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.total(), 5);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_perfect_predictions() {
        let labels = vec![0, 1, 2, 0, 1, 2];
        let metrics = Metrics::from_predictions(&labels, &labels, 3).unwrap();

        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.weighted_precision, 1.0);
        assert_eq!(metrics.weighted_recall, 1.0);
        assert_eq!(metrics.weighted_f1, 1.0);
        assert_eq!(metrics.macro_f1, 1.0);
    }

    #[test]
    fn test_weighted_averages_follow_support() {
        // class 0: 3 samples all right; class 1: 1 sample predicted as 0
        let predictions = vec![0, 0, 0, 0];
        let ground_truth = vec![0, 0, 0, 1];
        let metrics = Metrics::from_predictions(&predictions, &ground_truth, 2).unwrap();

        assert!((metrics.accuracy - 0.75).abs() < 1e-9);
        // class 0 precision 0.75 recall 1.0, class 1 both 0
        assert!((metrics.weighted_recall - 0.75).abs() < 1e-9);
        assert!((metrics.weighted_precision - 0.75 * 0.75).abs() < 1e-9);
        assert!((metrics.macro_recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(Metrics::from_predictions(&[0, 1], &[0], 2).is_err());
    }

    #[test]
    fn test_classification_report_names_classes() {
        let names = vec!["Tomato___healthy".to_string(), "Tomato___Late_blight".to_string()];
        let metrics = Metrics::from_predictions(&[0, 1, 1], &[0, 1, 0], 2)
            .unwrap()
            .with_class_names(&names);

        let report = metrics.classification_report();
        assert!(report.contains("Tomato___Late_blight"));
        assert!(report.contains("weighted avg"));
        assert!(report.contains("accuracy"));
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        avg.add(1.0);
        avg.add(2.0);
        avg.add(3.0);
        assert_eq!(avg.average(), 2.0);
        assert_eq!(avg.count(), 3);
    }
}
