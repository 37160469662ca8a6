use std::collections::HashMap;

use log::info;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{DataError, LabelVector};

pub const DEFAULT_EVAL_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Row indices of a train/eval partition, both sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub train_indices: Vec<usize>,
    pub eval_indices: Vec<usize>,
}

impl DataSplit {
    /// Picks the rows named by `indices` out of `items`.
    pub fn select<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
        indices.iter().filter_map(|&i| items.get(i).cloned()).collect()
    }
}

/// Splits rows into train/eval sets, keeping each label vector's share of
/// the data roughly equal in both.
///
/// A class is a distinct label vector. The eval set gets
/// `ceil(eval_fraction * n)` rows, distributed over the classes in
/// proportion to their size.
///
/// # Errors
/// - `InvalidFraction` unless `0 < eval_fraction < 1`
/// - `TooFewMembers` when a class has a single row
/// - `SplitTooSmall` when either side has fewer rows than there are classes
pub fn stratified_split(
    labels: &[LabelVector],
    eval_fraction: f64,
    seed: u64,
) -> Result<DataSplit, DataError> {
    if !(eval_fraction > 0.0 && eval_fraction < 1.0) {
        return Err(DataError::InvalidFraction(eval_fraction));
    }
    let n = labels.len();
    if n == 0 {
        return Err(DataError::Empty);
    }

    let classes = group_by_class(labels);
    if let Some((key, members)) = classes.iter().min_by_key(|(_, m)| m.len()) {
        if members.len() < 2 {
            return Err(DataError::TooFewMembers {
                class: class_name(key),
                count: members.len(),
            });
        }
    }

    let n_eval = (eval_fraction * n as f64).ceil() as usize;
    let n_train = n - n_eval;
    for (split, size) in [("eval", n_eval), ("train", n_train)] {
        if size < classes.len() {
            return Err(DataError::SplitTooSmall {
                split,
                size,
                classes: classes.len(),
            });
        }
    }

    let counts: Vec<usize> = classes.iter().map(|(_, m)| m.len()).collect();
    let eval_counts = allocate(&counts, n_eval);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train_indices = Vec::with_capacity(n_train);
    let mut eval_indices = Vec::with_capacity(n_eval);
    for ((_, mut members), take) in classes.into_iter().zip(eval_counts) {
        members.shuffle(&mut rng);
        eval_indices.extend_from_slice(&members[..take]);
        train_indices.extend_from_slice(&members[take..]);
    }
    train_indices.sort_unstable();
    eval_indices.sort_unstable();

    info!(
        "Stratified split: train={} eval={} over {} classes (seed {})",
        train_indices.len(),
        eval_indices.len(),
        counts.len(),
        seed
    );

    Ok(DataSplit {
        train_indices,
        eval_indices,
    })
}

/// Groups row indices by the set positions of their label vector, classes
/// ordered by first appearance.
fn group_by_class(labels: &[LabelVector]) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut order: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
    let mut lookup: HashMap<Vec<usize>, usize> = HashMap::new();
    for (row, vector) in labels.iter().enumerate() {
        let key: Vec<usize> = vector
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > 0.0)
            .map(|(i, _)| i)
            .collect();
        let slot = *lookup.entry(key.clone()).or_insert_with(|| {
            order.push((key, Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(row);
    }
    order
}

fn class_name(key: &[usize]) -> String {
    let parts: Vec<String> = key.iter().map(|i| format!("label[{}]", i)).collect();
    if parts.is_empty() {
        "<no labels>".to_string()
    } else {
        parts.join("+")
    }
}

/// Proportional allocation of `total` slots: floors first, then one extra
/// slot each for the largest fractional remainders (earlier class wins ties).
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| total as f64 * c as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let assigned: usize = alloc.iter().sum();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    let extra: Vec<usize> = order
        .into_iter()
        .filter(|&i| alloc[i] < counts[i])
        .take(total.saturating_sub(assigned))
        .collect();
    for i in extra {
        alloc[i] += 1;
    }
    alloc
}
