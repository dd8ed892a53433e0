//! Confidence gate for the single-image path

use serde::{Deserialize, Serialize};

/// Advisory attached to accepted predictions below the advisory threshold
pub const LOW_CONFIDENCE_MESSAGE: &str = "Low confidence prediction. Consider retaking image.";
/// Message for predictions below the rejection threshold
pub const REJECTED_MESSAGE: &str =
    "Very low confidence. The image is likely not a clear photo of a supported leaf.";
/// Message for confident predictions
pub const SUCCESS_MESSAGE: &str = "Prediction successful";

/// Thresholds on top-1 confidence; the two values are independent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceGateConfig {
    /// Below this the request is rejected
    pub reject_below: f32,
    /// Below this an accepted prediction carries an advisory
    pub advisory_below: f32,
}

impl Default for ConfidenceGateConfig {
    fn default() -> Self {
        Self {
            reject_below: 0.30,
            advisory_below: 0.50,
        }
    }
}

/// Outcome tier of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    Rejected,
    LowConfidence,
    Confident,
}

impl ConfidenceTier {
    pub fn message(&self) -> &'static str {
        match self {
            ConfidenceTier::Rejected => REJECTED_MESSAGE,
            ConfidenceTier::LowConfidence => LOW_CONFIDENCE_MESSAGE,
            ConfidenceTier::Confident => SUCCESS_MESSAGE,
        }
    }
}

impl ConfidenceGateConfig {
    pub fn classify(&self, confidence: f32) -> ConfidenceTier {
        if confidence < self.reject_below {
            ConfidenceTier::Rejected
        } else if confidence < self.advisory_below {
            ConfidenceTier::LowConfidence
        } else {
            ConfidenceTier::Confident
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers() {
        let gate = ConfidenceGateConfig::default();
        assert_eq!(gate.classify(0.10), ConfidenceTier::Rejected);
        assert_eq!(gate.classify(0.40), ConfidenceTier::LowConfidence);
        assert_eq!(gate.classify(0.90), ConfidenceTier::Confident);
    }

    #[test]
    fn test_boundaries_are_inclusive_on_the_upper_tier() {
        let gate = ConfidenceGateConfig::default();
        assert_eq!(gate.classify(0.30), ConfidenceTier::LowConfidence);
        assert_eq!(gate.classify(0.50), ConfidenceTier::Confident);
    }

    #[test]
    fn test_non_adjacent_thresholds() {
        let gate = ConfidenceGateConfig {
            reject_below: 0.05,
            advisory_below: 0.80,
        };
        assert_eq!(gate.classify(0.10), ConfidenceTier::LowConfidence);
        assert_eq!(gate.classify(0.79), ConfidenceTier::LowConfidence);
        assert_eq!(gate.classify(0.81), ConfidenceTier::Confident);
    }

    #[test]
    fn test_messages() {
        assert_eq!(ConfidenceTier::LowConfidence.message(), LOW_CONFIDENCE_MESSAGE);
        assert_eq!(ConfidenceTier::Confident.message(), SUCCESS_MESSAGE);
        assert_eq!(ConfidenceTier::Rejected.message(), REJECTED_MESSAGE);
        assert_ne!(ConfidenceTier::Rejected.message(), LOW_CONFIDENCE_MESSAGE);
    }
}
