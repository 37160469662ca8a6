//! Raw data loading and label preparation.
//!
//! The pipeline runs leaves first: [`load_records`] reads the CSV,
//! [`LabelBinarizer`] turns each single-label row into a multi-hot vector,
//! [`stratified_split`] partitions the rows, and [`DatasetPreprocessor`]
//! tokenizes them into [`PreparedDataset`]s for the trainer.

use std::io;
use std::path::Path;

use log::info;

mod labels;
mod preprocess;
mod split;

pub use labels::{DiseaseVocabulary, LabelBinarizer, LabelVector, DEFAULT_DISEASES};
pub use preprocess::{DatasetPreprocessor, PreparedDataset, PreparedExample, DEFAULT_MAP_BATCH_SIZE};
pub use split::{stratified_split, DataSplit, DEFAULT_EVAL_FRACTION, DEFAULT_SPLIT_SEED};

/// Errors raised while loading or preparing training data.
///
/// Every variant names the precondition that was violated; none of them are
/// recovered from.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Required column '{0}' not found in CSV header")]
    MissingColumn(String),
    #[error("Row {row}: label '{label}' is not in the disease vocabulary")]
    UnknownLabel { row: usize, label: String },
    #[error("Row {row}: label vector has length {actual}, expected {expected}")]
    LabelLength { row: usize, expected: usize, actual: usize },
    #[error("Invalid disease vocabulary: {0}")]
    InvalidVocabulary(String),
    #[error(
        "The least populated class '{class}' has only {count} member(s); stratified splitting needs at least 2"
    )]
    TooFewMembers { class: String, count: usize },
    #[error("{split} split would hold {size} rows, fewer than the {classes} classes being stratified")]
    SplitTooSmall {
        split: &'static str,
        size: usize,
        classes: usize,
    },
    #[error("Eval fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
    #[error("Dataset is empty")]
    Empty,
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
}

/// One row of the source CSV: free text and a single disease name.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawRecord {
    pub text: String,
    pub label: String,
}

impl RawRecord {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// Reads `text`/`label` rows from a CSV file.
///
/// Columns are located by header name, so the unnamed index column that
/// pandas writes (and any other extra column) is ignored.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>, DataError> {
    let path = path.as_ref();
    info!("Loading records from {:?}", path);
    let reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let records = read_records(reader)?;
    info!("Loaded {} records", records.len());
    Ok(records)
}

/// Same as [`load_records`] but over any reader, e.g. an in-memory buffer.
pub fn load_records_from_reader<R: io::Read>(reader: R) -> Result<Vec<RawRecord>, DataError> {
    read_records(csv::ReaderBuilder::new().flexible(true).from_reader(reader))
}

fn read_records<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<RawRecord>, DataError> {
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    };
    let text_idx = column("text")?;
    let label_idx = column("label")?;

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let field = |idx: usize, name: &str| {
            record.get(idx).map(str::to_string).ok_or_else(|| {
                DataError::MissingColumn(format!("{} (row {})", name, row + 1))
            })
        };
        records.push(RawRecord {
            text: field(text_idx, "text")?,
            label: field(label_idx, "label")?,
        });
    }
    Ok(records)
}
