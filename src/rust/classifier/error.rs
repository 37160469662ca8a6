use candle_core::Error as CandleError;
use ort::Error as OrtError;

use crate::data::DataError;

/// Represents the different types of errors that can occur while loading or
/// running the disease classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Error occurred while loading or using the tokenizer
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
    /// Error occurred while loading or running the model
    #[error("Model error: {0}")]
    ModelError(String),
    /// Error occurred during the build phase
    #[error("Build error: {0}")]
    BuildError(String),
    /// Error occurred while making predictions
    #[error("Prediction error: {0}")]
    PredictionError(String),
    /// Error occurred due to invalid input parameters
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// The model directory is incomplete or does not match its checksums
    #[error("Artifact error: {0}")]
    ArtifactError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OrtError> for ClassifierError {
    fn from(err: OrtError) -> Self {
        ClassifierError::ModelError(err.to_string())
    }
}

impl From<CandleError> for ClassifierError {
    fn from(err: CandleError) -> Self {
        ClassifierError::ModelError(err.to_string())
    }
}

impl From<DataError> for ClassifierError {
    fn from(err: DataError) -> Self {
        ClassifierError::ArtifactError(err.to_string())
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::ArtifactError(format!("Invalid JSON: {}", err))
    }
}
