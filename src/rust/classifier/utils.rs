use ndarray::Array2;

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn sigmoid_rows(logits: &Array2<f32>) -> Array2<f32> {
    logits.mapv(sigmoid)
}

/// Clamps a requested `k` into `[1, n]`.
pub(crate) fn clamp_k(k: usize, n: usize) -> usize {
    k.clamp(1, n.max(1))
}

/// Indices of the `k` highest scores, best first. Equal scores keep index
/// order, so the lower index wins a tie.
pub(crate) fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(clamp_k(k, scores.len()).min(scores.len()));
    order
}
