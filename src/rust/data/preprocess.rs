use log::debug;

use super::{DataError, LabelVector, RawRecord};
use crate::classifier::{TokenizedText, TokenizerAdapter};

/// Number of texts handed to the tokenizer per call.
pub const DEFAULT_MAP_BATCH_SIZE: usize = 1000;

/// A tokenized text paired with its multi-hot label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedExample {
    pub tokens: TokenizedText,
    pub labels: LabelVector,
}

/// Model-ready examples, all padded to the same length and all carrying
/// label vectors of the same width.
#[derive(Debug, Clone, Default)]
pub struct PreparedDataset {
    examples: Vec<PreparedExample>,
    max_length: usize,
    num_labels: usize,
}

impl PreparedDataset {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[PreparedExample] {
        &self.examples
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &PreparedExample> {
        self.examples.iter()
    }
}

/// Tokenizes texts in fixed-size chunks and attaches their labels.
pub struct DatasetPreprocessor<'a> {
    tokenizer: &'a TokenizerAdapter,
    batch_size: usize,
}

impl<'a> DatasetPreprocessor<'a> {
    pub fn new(tokenizer: &'a TokenizerAdapter) -> Self {
        Self {
            tokenizer,
            batch_size: DEFAULT_MAP_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Tokenizes `texts` and pairs them with `labels`, preserving order.
    ///
    /// # Errors
    /// - `LabelLength` when the two slices differ in length, or when a label
    ///   vector is not as wide as the first one
    /// - `Tokenization` when the tokenizer rejects a text
    pub fn prepare(&self, texts: &[&str], labels: &[LabelVector]) -> Result<PreparedDataset, DataError> {
        if texts.len() != labels.len() {
            return Err(DataError::LabelLength {
                row: texts.len().min(labels.len()) + 1,
                expected: texts.len(),
                actual: labels.len(),
            });
        }
        let num_labels = labels.first().map(Vec::len).unwrap_or(0);
        if let Some((row, bad)) = labels.iter().enumerate().find(|(_, l)| l.len() != num_labels) {
            return Err(DataError::LabelLength {
                row: row + 1,
                expected: num_labels,
                actual: bad.len(),
            });
        }

        let mut examples = Vec::with_capacity(texts.len());
        for (chunk_idx, (chunk, chunk_labels)) in texts
            .chunks(self.batch_size)
            .zip(labels.chunks(self.batch_size))
            .enumerate()
        {
            let tokens = self
                .tokenizer
                .encode_batch(chunk)
                .map_err(|e| DataError::Tokenization(e.to_string()))?;
            debug!("Tokenized chunk {} ({} texts)", chunk_idx, chunk.len());
            examples.extend(
                tokens
                    .into_iter()
                    .zip(chunk_labels.iter().cloned())
                    .map(|(tokens, labels)| PreparedExample { tokens, labels }),
            );
        }

        Ok(PreparedDataset {
            examples,
            max_length: self.tokenizer.max_length(),
            num_labels,
        })
    }

    /// Convenience over [`prepare`](Self::prepare) for loaded CSV rows.
    pub fn prepare_records(
        &self,
        records: &[RawRecord],
        labels: &[LabelVector],
    ) -> Result<PreparedDataset, DataError> {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        self.prepare(&texts, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabelBinarizer;

    fn tokenizer() -> TokenizerAdapter {
        let vocab = [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "i", "have", "a", "headache", "rash", "fever",
        ];
        TokenizerAdapter::from_wordpiece_vocab(vocab, 12).unwrap()
    }

    #[test]
    fn test_prepare_preserves_order_across_chunks() {
        let tokenizer = tokenizer();
        let records = vec![
            RawRecord::new("i have a headache", "Migraine"),
            RawRecord::new("rash", "Psoriasis"),
            RawRecord::new("fever", "Dengue"),
            RawRecord::new("a rash and a fever", "Chicken pox"),
            RawRecord::new("headache", "Migraine"),
        ];
        let labels = LabelBinarizer::default().transform(&records).unwrap();

        let dataset = DatasetPreprocessor::new(&tokenizer)
            .with_batch_size(2)
            .prepare_records(&records, &labels)
            .unwrap();

        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.max_length(), 12);
        assert_eq!(dataset.num_labels(), 24);
        for (example, record) in dataset.iter().zip(records.iter()) {
            assert_eq!(example.tokens, tokenizer.encode(&record.text).unwrap());
            assert_eq!(example.tokens.len(), 12);
        }
        assert_eq!(dataset.examples()[2].labels, labels[2]);
    }

    #[test]
    fn test_mismatched_label_width_is_rejected() {
        let tokenizer = tokenizer();
        let labels = vec![vec![1.0, 0.0], vec![0.0, 1.0, 0.0]];
        let err = DatasetPreprocessor::new(&tokenizer)
            .prepare(&["rash", "fever"], &labels)
            .unwrap_err();
        assert!(matches!(
            err,
            DataError::LabelLength {
                row: 2,
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_text_and_label_counts_must_match() {
        let tokenizer = tokenizer();
        let err = DatasetPreprocessor::new(&tokenizer)
            .prepare(&["rash", "fever"], &[vec![1.0]])
            .unwrap_err();
        assert!(matches!(err, DataError::LabelLength { .. }));
    }
}
