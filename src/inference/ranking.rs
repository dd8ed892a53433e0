//! Top-K ranking of class probabilities

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One ranked class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionItem {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
}

/// Indices of the `k` most probable classes, most probable first
///
/// Equal probabilities keep ascending class index order. `k` is clamped to
/// the number of classes.
pub fn top_k_indices(probabilities: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probabilities.len()).collect();
    indices.sort_by(|&a, &b| match probabilities[b].total_cmp(&probabilities[a]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });
    indices.truncate(k.min(probabilities.len()));
    indices
}

/// Top-K (class, confidence) pairs
///
/// `class_names` must be index-aligned with `probabilities`.
pub fn rank(probabilities: &[f32], class_names: &[String], k: usize) -> Vec<PredictionItem> {
    top_k_indices(probabilities, k)
        .into_iter()
        .map(|idx| PredictionItem {
            class_name: class_names[idx].clone(),
            confidence: probabilities[idx],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{}", i)).collect()
    }

    #[test]
    fn test_sorted_descending() {
        let probs = [0.05, 0.5, 0.1, 0.3, 0.05];
        let ranked = rank(&probs, &names(5), 3);

        let classes: Vec<&str> = ranked.iter().map(|p| p.class_name.as_str()).collect();
        assert_eq!(classes, vec!["c1", "c3", "c2"]);
        assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_ties_break_by_class_index() {
        let probs = [0.2, 0.3, 0.2, 0.3];
        assert_eq!(top_k_indices(&probs, 4), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_k_clamped_to_class_count() {
        let probs = [0.7, 0.2, 0.1];
        assert_eq!(rank(&probs, &names(3), 5).len(), 3);
        assert!(rank(&probs, &names(3), 0).is_empty());
    }

    #[test]
    fn test_full_ranking_sums_to_one() {
        let probs = [0.1, 0.2, 0.3, 0.4];
        let total: f32 = rank(&probs, &names(4), 4).iter().map(|p| p.confidence).sum();
        assert!((total - 1.0).abs() < 1e-6);

        let partial: f32 = rank(&probs, &names(4), 2).iter().map(|p| p.confidence).sum();
        assert!(partial <= 1.0);
    }

    #[test]
    fn test_ordering_property_over_many_vectors() {
        // deterministic pseudo-random vectors with deliberate ties
        for seed in 0..50u32 {
            let n = 1 + (seed as usize * 7) % 13;
            let raw: Vec<f32> = (0..n)
                .map(|i| ((i as u32).wrapping_mul(2654435761).wrapping_add(seed * 40503) % 5) as f32 + 1.0)
                .collect();
            let sum: f32 = raw.iter().sum();
            let probs: Vec<f32> = raw.iter().map(|x| x / sum).collect();

            for k in [1, 3, 5, 20] {
                let idx = top_k_indices(&probs, k);
                assert_eq!(idx.len(), k.min(n));
                for w in idx.windows(2) {
                    let (a, b) = (w[0], w[1]);
                    assert!(probs[a] > probs[b] || (probs[a] == probs[b] && a < b));
                }
            }
        }
    }

    #[test]
    fn test_serializes_with_class_key() {
        let item = PredictionItem {
            class_name: "Tomato___healthy".to_string(),
            confidence: 0.5,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["class"], "Tomato___healthy");
    }
}
