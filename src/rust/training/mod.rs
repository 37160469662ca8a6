//! Fine-tuning of the multi-label disease classifier.
//!
//! [`train`] runs the whole pipeline: binarize labels, split stratified,
//! tokenize, fine-tune with per-epoch evaluation and checkpoints, then write
//! the final [`ModelArtifact`] to the output directory.

use std::io;
use std::path::{Path, PathBuf};

use candle_core::Device;
use log::info;
use serde::{Deserialize, Serialize};

mod batches;
mod metrics;
mod trainer;

pub use batches::{Batch, BatchIterator, TensorDataset};
pub use metrics::{bce_with_logits, macro_f1, per_label_f1, EvalMetrics, DEFAULT_THRESHOLD};
pub use trainer::{EpochMetrics, LogEntry, Trainer, TrainerState, TRAINER_STATE_FILE, TRAINING_CONFIG_FILE};

use crate::classifier::{
    ClassifierError, ModelArtifact, PretrainedEncoder, WeightLoadReport, DEFAULT_CLASSIFIER_DROPOUT,
    DEFAULT_MAX_LENGTH,
};
use crate::data::{
    load_records, stratified_split, DataError, DataSplit, DatasetPreprocessor, DiseaseVocabulary, LabelBinarizer,
    RawRecord, DEFAULT_EVAL_FRACTION, DEFAULT_SPLIT_SEED,
};
use crate::model_manager::ModelError;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid training configuration: {0}")]
    Config(String),
}

/// Hyperparameters of a fine-tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub max_length: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub logging_steps: usize,
    pub eval_fraction: f64,
    pub seed: u64,
    pub threshold: f32,
    pub classifier_dropout: f32,
    pub save_checkpoints: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            batch_size: 16,
            eval_batch_size: 16,
            num_epochs: 4,
            learning_rate: 2e-5,
            weight_decay: 0.01,
            logging_steps: 50,
            eval_fraction: DEFAULT_EVAL_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
            threshold: DEFAULT_THRESHOLD,
            classifier_dropout: DEFAULT_CLASSIFIER_DROPOUT,
            save_checkpoints: true,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        let positive = [
            ("max_length", self.max_length),
            ("batch_size", self.batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("num_epochs", self.num_epochs),
            ("logging_steps", self.logging_steps),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TrainingError::Config(format!("{} must be positive", name)));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TrainingError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.classifier_dropout) {
            return Err(TrainingError::Config(format!(
                "classifier_dropout must be in [0, 1), got {}",
                self.classifier_dropout
            )));
        }
        Ok(())
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    pub global_step: usize,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub weights: WeightLoadReport,
    pub artifact: ModelArtifact,
}

impl TrainingReport {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact.dir().to_path_buf()
    }
}

/// Fine-tunes `encoder` on `records` and writes the artifact to `out_dir`.
///
/// # Errors
/// Every data precondition (unknown label, too-small class, empty split)
/// fails before any weights are touched.
pub fn train(
    records: &[RawRecord],
    encoder: &PretrainedEncoder,
    vocabulary: &DiseaseVocabulary,
    config: TrainingConfig,
    out_dir: &Path,
    device: Device,
) -> Result<TrainingReport, TrainingError> {
    config.validate()?;
    if config.max_length > encoder.config.max_position_embeddings {
        return Err(TrainingError::Config(format!(
            "max_length {} exceeds the encoder's {} positions",
            config.max_length, encoder.config.max_position_embeddings
        )));
    }
    info!("Training configuration: {:?}", config);

    let labels = LabelBinarizer::new(vocabulary.clone()).transform(records)?;
    let split = stratified_split(&labels, config.eval_fraction, config.seed)?;

    let tokenizer = encoder.tokenizer(config.max_length)?;
    let preprocessor = DatasetPreprocessor::new(&tokenizer);
    let train_set = preprocessor.prepare_records(
        &DataSplit::select(records, &split.train_indices),
        &DataSplit::select(&labels, &split.train_indices),
    )?;
    let eval_set = preprocessor.prepare_records(
        &DataSplit::select(records, &split.eval_indices),
        &DataSplit::select(&labels, &split.eval_indices),
    )?;

    std::fs::create_dir_all(out_dir)?;
    let (mut trainer, weights) = Trainer::new(encoder, vocabulary, config, device)?;
    let history = trainer.fit(&train_set, &eval_set, out_dir)?;

    let artifact = ModelArtifact::save(out_dir, trainer.varmap(), &encoder.config_json, &tokenizer, vocabulary)?;
    trainer.write_state(out_dir)?;
    info!("Training finished after {} steps", trainer.state().global_step);

    Ok(TrainingReport {
        history,
        global_step: trainer.state().global_step,
        train_examples: train_set.len(),
        eval_examples: eval_set.len(),
        weights,
        artifact,
    })
}

/// [`train`] over a CSV file with `text` and `label` columns.
pub fn train_from_csv(
    data: &Path,
    encoder: &PretrainedEncoder,
    vocabulary: &DiseaseVocabulary,
    config: TrainingConfig,
    out_dir: &Path,
    device: Device,
) -> Result<TrainingReport, TrainingError> {
    let records = load_records(data)?;
    if records.is_empty() {
        return Err(DataError::Empty.into());
    }
    train(&records, encoder, vocabulary, config, out_dir, device)
}
