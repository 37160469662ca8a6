use std::path::PathBuf;

use ndarray::Array2;

mod artifact;
mod bert;
pub mod builder;
mod error;
mod inference;
mod onnx;
mod tokenizer;
pub(crate) mod utils;

pub use artifact::{
    classification_config, ModelArtifact, WeightsFormat, CONFIG_FILE, ONNX_WEIGHTS_FILE, TOKENIZER_FILE,
    VOCABULARY_FILE, WEIGHTS_FILE,
};
pub use bert::{
    load_pretrained_weights, parse_bert_config, with_bert_defaults, BertClassifier, PretrainedEncoder,
    WeightLoadReport, DEFAULT_CLASSIFIER_DROPOUT,
};
pub use builder::EngineBuilder;
pub use error::ClassifierError;
pub use inference::{InferenceEngine, Prediction};
pub use onnx::OnnxClassifier;
pub use tokenizer::{TokenBatch, TokenizedText, TokenizerAdapter, DEFAULT_MAX_LENGTH};

/// A model that maps a tokenized batch to one logit per disease.
///
/// Implementations must be shareable across threads; the HTTP service calls
/// them from blocking worker tasks.
pub trait SequenceClassifier: Send + Sync {
    /// Width of each logits row.
    fn num_labels(&self) -> usize;

    /// Raw scores of shape `[batch, num_labels]`, before the sigmoid.
    fn logits(&self, batch: &TokenBatch) -> Result<Array2<f32>, ClassifierError>;
}

/// Information about the current state and configuration of an engine
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Directory the model was loaded from, if any
    pub model_dir: Option<PathBuf>,
    /// Which backend runs the forward pass
    pub backend: String,
    /// Number of diseases the model scores
    pub num_labels: usize,
    /// Disease names in output order
    pub labels: Vec<String>,
    /// Fixed sequence length of every encoded input
    pub max_length: usize,
}
