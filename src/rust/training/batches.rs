use candle_core::{DType, Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data::PreparedDataset;

/// A prepared dataset moved onto the compute device as four row-aligned
/// tensors.
pub struct TensorDataset {
    input_ids: Tensor,
    attention_mask: Tensor,
    token_type_ids: Tensor,
    labels: Tensor,
    len: usize,
}

/// One mini-batch: `[batch, seq_len]` u32 inputs and `[batch, num_labels]`
/// f32 targets.
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }
}

impl TensorDataset {
    pub fn from_prepared(dataset: &PreparedDataset, device: &Device) -> candle_core::Result<Self> {
        let n = dataset.len();
        let seq_len = dataset.max_length();
        let num_labels = dataset.num_labels();

        let column = |field: fn(&crate::classifier::TokenizedText) -> &[u32]| -> candle_core::Result<Tensor> {
            let flat: Vec<u32> = dataset.iter().flat_map(|e| field(&e.tokens).iter().copied()).collect();
            Tensor::from_vec(flat, (n, seq_len), device)
        };
        let input_ids = column(|t| t.input_ids.as_slice())?;
        let attention_mask = column(|t| t.attention_mask.as_slice())?;
        let token_type_ids = column(|t| t.token_type_ids.as_slice())?;

        let labels: Vec<f32> = dataset.iter().flat_map(|e| e.labels.iter().copied()).collect();
        let labels = Tensor::from_vec(labels, (n, num_labels), device)?.to_dtype(DType::F32)?;

        Ok(Self {
            input_ids,
            attention_mask,
            token_type_ids,
            labels,
            len: n,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device(&self) -> &Device {
        self.labels.device()
    }

    /// Gathers the rows named by `indices`.
    pub fn gather(&self, indices: &[u32]) -> candle_core::Result<Batch> {
        let idx = Tensor::from_slice(indices, indices.len(), self.device())?;
        Ok(Batch {
            input_ids: self.input_ids.index_select(&idx, 0)?,
            attention_mask: self.attention_mask.index_select(&idx, 0)?,
            token_type_ids: self.token_type_ids.index_select(&idx, 0)?,
            labels: self.labels.index_select(&idx, 0)?,
        })
    }
}

/// Walks a [`TensorDataset`] in mini-batches. The last batch may be short.
pub struct BatchIterator<'a> {
    dataset: &'a TensorDataset,
    order: Vec<u32>,
    batch_size: usize,
    position: usize,
}

impl<'a> BatchIterator<'a> {
    /// Rows in dataset order, for evaluation.
    pub fn sequential(dataset: &'a TensorDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            order: (0..dataset.len() as u32).collect(),
            batch_size: batch_size.max(1),
            position: 0,
        }
    }

    /// Rows in a permutation drawn from `seed`.
    pub fn shuffled(dataset: &'a TensorDataset, batch_size: usize, seed: u64) -> Self {
        let mut iter = Self::sequential(dataset, batch_size);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        iter.order.shuffle(&mut rng);
        iter
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn next_batch(&mut self) -> candle_core::Result<Option<Batch>> {
        if self.position >= self.order.len() {
            return Ok(None);
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let batch = self.dataset.gather(&self.order[self.position..end])?;
        self.position = end;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TokenizerAdapter;
    use crate::data::DatasetPreprocessor;

    fn dataset(n: usize) -> TensorDataset {
        let tokenizer =
            TokenizerAdapter::from_wordpiece_vocab(["[PAD]", "[UNK]", "[CLS]", "[SEP]", "rash"], 6).unwrap();
        let texts: Vec<&str> = vec!["rash"; n];
        let labels: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 1.0]).collect();
        let prepared = DatasetPreprocessor::new(&tokenizer).prepare(&texts, &labels).unwrap();
        TensorDataset::from_prepared(&prepared, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_sequential_batches_cover_all_rows() {
        let data = dataset(5);
        let mut iter = BatchIterator::sequential(&data, 2);
        assert_eq!(iter.num_batches(), 3);
        let mut sizes = Vec::new();
        let mut first_labels = Vec::new();
        while let Some(batch) = iter.next_batch().unwrap() {
            assert_eq!(batch.input_ids.dims(), &[batch.size(), 6]);
            sizes.push(batch.size());
            let rows = batch.labels.to_vec2::<f32>().unwrap();
            first_labels.extend(rows.iter().map(|r| r[0]));
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(first_labels, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let data = dataset(16);
        let a = BatchIterator::shuffled(&data, 4, 42);
        let b = BatchIterator::shuffled(&data, 4, 42);
        let c = BatchIterator::shuffled(&data, 4, 43);
        assert_eq!(a.order(), b.order());
        assert_ne!(a.order(), c.order());
        let mut sorted = a.order().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<u32>>());
    }
}
