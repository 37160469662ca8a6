mod common;

use std::collections::HashSet;

use proptest::prelude::*;
use symptom_classifier::data::{
    load_records, stratified_split, DataSplit, DatasetPreprocessor, DEFAULT_EVAL_FRACTION, DEFAULT_SPLIT_SEED,
};
use symptom_classifier::{LabelBinarizer, RawRecord, DEFAULT_DISEASES};

#[test]
fn test_csv_to_prepared_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("symptoms.csv");
    common::write_csv(&path, &common::records());

    let records = load_records(&path).unwrap();
    assert_eq!(records, common::records());

    let binarizer = LabelBinarizer::new(common::vocabulary());
    let labels = binarizer.transform(&records).unwrap();
    assert!(labels.iter().all(|v| v.len() == 4));

    let split = stratified_split(&labels, DEFAULT_EVAL_FRACTION, DEFAULT_SPLIT_SEED).unwrap();
    assert_eq!(split.eval_indices.len(), 4);
    assert_eq!(split.train_indices.len(), 16);

    // One held-out example per disease
    let held_out: HashSet<&str> = split
        .eval_indices
        .iter()
        .map(|&i| records[i].label.as_str())
        .collect();
    assert_eq!(held_out.len(), 4);

    let tokenizer = common::tokenizer();
    let prepared = DatasetPreprocessor::new(&tokenizer)
        .with_batch_size(3)
        .prepare_records(
            &DataSplit::select(&records, &split.eval_indices),
            &DataSplit::select(&labels, &split.eval_indices),
        )
        .unwrap();
    assert_eq!(prepared.len(), 4);
    assert_eq!(prepared.max_length(), common::MAX_LENGTH);
    for example in prepared.iter() {
        assert_eq!(example.tokens.input_ids.len(), common::MAX_LENGTH);
        assert_eq!(example.tokens.attention_mask.len(), common::MAX_LENGTH);
        assert_eq!(example.labels.iter().sum::<f32>(), 1.0);
    }
}

#[test]
fn test_long_text_truncated_to_max_length() {
    let tokenizer = common::tokenizer();
    let long = "headache ".repeat(100);
    let encoded = tokenizer.encode(&long).unwrap();
    assert_eq!(encoded.len(), common::MAX_LENGTH);
    assert_eq!(encoded.real_tokens(), common::MAX_LENGTH);

    let short = tokenizer.encode("fever").unwrap();
    assert_eq!(short.len(), common::MAX_LENGTH);
    // [CLS] fever [SEP]
    assert_eq!(short.real_tokens(), 3);
}

proptest! {
    #[test]
    fn prop_split_partitions_records(counts in prop::collection::vec(2usize..8, 24)) {
        let records: Vec<RawRecord> = counts
            .iter()
            .enumerate()
            .flat_map(|(d, &n)| (0..n).map(move |i| RawRecord::new(format!("case {}", i), DEFAULT_DISEASES[d])))
            .collect();
        let labels = LabelBinarizer::default().transform(&records).unwrap();
        prop_assert!(labels.iter().all(|v| v.len() == 24));

        let total = records.len();
        let expected_eval = (0.2 * total as f64).ceil() as usize;
        match stratified_split(&labels, 0.2, 7) {
            Ok(split) => {
                prop_assert_eq!(split.eval_indices.len(), expected_eval);
                prop_assert_eq!(split.train_indices.len() + split.eval_indices.len(), total);
                let train: HashSet<usize> = split.train_indices.iter().copied().collect();
                prop_assert!(split.eval_indices.iter().all(|i| !train.contains(i)));
            }
            // Fewer eval rows than diseases cannot be stratified
            Err(_) => prop_assert!(expected_eval < 24),
        }
    }
}
