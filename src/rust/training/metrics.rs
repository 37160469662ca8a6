use candle_core::Tensor;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Probability above which a label counts as predicted.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Numerically stable binary cross-entropy with logits, averaged over every
/// label of every example:
///
/// ```text
/// L = mean(max(x, 0) - x * y + log(1 + exp(-|x|)))
/// ```
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let relu = logits.relu()?;
    let cross = logits.mul(targets)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    relu.sub(&cross)?.add(&softplus)?.mean_all()
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    pub f1_macro: f64,
    pub num_examples: usize,
}

/// F1 of every label column. A label with no true and no predicted
/// positives scores 0.
pub fn per_label_f1(probabilities: &Array2<f32>, labels: &Array2<f32>, threshold: f32) -> Vec<f64> {
    probabilities
        .axis_iter(Axis(1))
        .zip(labels.axis_iter(Axis(1)))
        .map(|(predicted, truth)| {
            let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
            for (&p, &t) in predicted.iter().zip(truth.iter()) {
                match (p >= threshold, t >= 0.5) {
                    (true, true) => tp += 1,
                    (true, false) => fp += 1,
                    (false, true) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let denominator = 2 * tp + fp + fn_;
            if denominator == 0 {
                0.0
            } else {
                2.0 * tp as f64 / denominator as f64
            }
        })
        .collect()
}

/// Unweighted mean of [`per_label_f1`].
pub fn macro_f1(probabilities: &Array2<f32>, labels: &Array2<f32>, threshold: f32) -> f64 {
    let scores = per_label_f1(probabilities, labels, threshold);
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use ndarray::array;

    fn reference_bce(logits: &[f32], targets: &[f32]) -> f32 {
        let total: f32 = logits
            .iter()
            .zip(targets)
            .map(|(&x, &y)| {
                let p = 1.0 / (1.0 + (-x).exp());
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum();
        total / logits.len() as f32
    }

    #[test]
    fn test_bce_matches_reference() {
        let logits = [2.0f32, -1.0, 0.5, -3.0];
        let targets = [1.0f32, 0.0, 1.0, 1.0];
        let x = Tensor::from_slice(&logits, (2, 2), &Device::Cpu).unwrap();
        let y = Tensor::from_slice(&targets, (2, 2), &Device::Cpu).unwrap();
        let loss = bce_with_logits(&x, &y).unwrap().to_scalar::<f32>().unwrap();
        assert!((loss - reference_bce(&logits, &targets)).abs() < 1e-5);
    }

    #[test]
    fn test_bce_stable_for_large_logits() {
        let x = Tensor::from_slice(&[100.0f32, -100.0], (1, 2), &Device::Cpu).unwrap();
        let y = Tensor::from_slice(&[1.0f32, 0.0], (1, 2), &Device::Cpu).unwrap();
        let loss = bce_with_logits(&x, &y).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.is_finite());
        assert!(loss < 1e-6);
    }

    #[test]
    fn test_macro_f1_perfect_and_empty_labels() {
        let labels = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let probs = array![[0.9, 0.1, 0.2], [0.3, 0.8, 0.1]];
        let scores = per_label_f1(&probs, &labels, 0.5);
        assert_eq!(scores, vec![1.0, 1.0, 0.0]);
        assert!((macro_f1(&probs, &labels, 0.5) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_f1_counts_false_positives() {
        let labels = array![[1.0], [0.0], [1.0], [0.0]];
        let probs = array![[0.9], [0.7], [0.2], [0.1]];
        // tp=1 fp=1 fn=1
        assert!((per_label_f1(&probs, &labels, 0.5)[0] - 0.5).abs() < 1e-12);
    }
}
