use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::builder::EngineBuilder;
use super::error::ClassifierError;
use super::tokenizer::TokenizerAdapter;
use super::utils::{sigmoid_rows, top_k_indices};
use super::{ClassifierInfo, SequenceClassifier};
use crate::data::DiseaseVocabulary;

/// One ranked disease and its independent sigmoid probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// Turns free text into ranked disease probabilities.
///
/// Each disease is scored independently (sigmoid over its logit), so the
/// probabilities do not sum to one. Prediction is read-only: an engine can
/// be wrapped in `Arc` and shared by any number of threads.
pub struct InferenceEngine {
    classifier: Box<dyn SequenceClassifier>,
    tokenizer: TokenizerAdapter,
    vocabulary: DiseaseVocabulary,
    model_dir: Option<PathBuf>,
    backend: String,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<InferenceEngine>();
    }
};

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("backend", &self.backend)
            .field("model_dir", &self.model_dir)
            .field("num_labels", &self.vocabulary.len())
            .field("max_length", &self.tokenizer.max_length())
            .finish()
    }
}

impl InferenceEngine {
    /// Assembles an engine from already-loaded parts.
    ///
    /// # Errors
    /// `ArtifactError` if the classifier's output width differs from the
    /// vocabulary size.
    pub fn new(
        classifier: Box<dyn SequenceClassifier>,
        tokenizer: TokenizerAdapter,
        vocabulary: DiseaseVocabulary,
    ) -> Result<Self, ClassifierError> {
        if classifier.num_labels() != vocabulary.len() {
            return Err(ClassifierError::ArtifactError(format!(
                "Classifier produces {} scores but the vocabulary has {} diseases",
                classifier.num_labels(),
                vocabulary.len()
            )));
        }
        Ok(Self {
            classifier,
            tokenizer,
            vocabulary,
            model_dir: None,
            backend: "custom".to_string(),
        })
    }

    pub(crate) fn with_source(mut self, model_dir: &Path, backend: &str) -> Self {
        self.model_dir = Some(model_dir.to_path_buf());
        self.backend = backend.to_string();
        self
    }

    /// Creates a new EngineBuilder for fluent construction
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Loads a trained artifact with default settings (auto-selected device,
    /// the sequence length the model was saved with).
    pub fn from_model_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ClassifierError> {
        Self::builder().with_model_dir(dir)?.build()
    }

    /// Returns information about the engine's current state
    pub fn info(&self) -> ClassifierInfo {
        ClassifierInfo {
            model_dir: self.model_dir.clone(),
            backend: self.backend.clone(),
            num_labels: self.vocabulary.len(),
            labels: self.vocabulary.names().to_vec(),
            max_length: self.tokenizer.max_length(),
        }
    }

    pub fn vocabulary(&self) -> &DiseaseVocabulary {
        &self.vocabulary
    }

    pub fn tokenizer(&self) -> &TokenizerAdapter {
        &self.tokenizer
    }

    /// Probability of every disease for `text`, in vocabulary order.
    ///
    /// # Errors
    /// - `ValidationError` if the text is empty or whitespace
    /// - `TokenizerError`/`ModelError` from the underlying pipeline
    pub fn predict_proba(&self, text: &str) -> Result<Vec<f32>, ClassifierError> {
        let mut rows = self.predict_proba_batch(&[text])?;
        rows.pop()
            .ok_or_else(|| ClassifierError::PredictionError("Model returned no rows".into()))
    }

    /// Probabilities for many texts in one forward pass, in input order.
    pub fn predict_proba_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(ClassifierError::ValidationError(format!(
                "Input text {} cannot be empty",
                pos + 1
            )));
        }

        let batch = self.tokenizer.encode_to_batch(texts)?;
        let logits = self.classifier.logits(&batch)?;
        if logits.dim() != (texts.len(), self.vocabulary.len()) {
            return Err(ClassifierError::PredictionError(format!(
                "Expected logits of shape ({}, {}), got {:?}",
                texts.len(),
                self.vocabulary.len(),
                logits.dim()
            )));
        }
        Ok(sigmoid_rows(&logits).outer_iter().map(|row| row.to_vec()).collect())
    }

    /// The `k` most probable diseases, best first. `k` is clamped into
    /// `[1, number of diseases]`; equal probabilities keep vocabulary order.
    pub fn predict_top_k(&self, text: &str, k: usize) -> Result<Vec<Prediction>, ClassifierError> {
        let probabilities = self.predict_proba(text)?;
        Ok(self.rank(&probabilities, k))
    }

    /// [`predict_top_k`](Self::predict_top_k) over several texts.
    pub fn predict_batch(&self, texts: &[&str], k: usize) -> Result<Vec<Vec<Prediction>>, ClassifierError> {
        Ok(self
            .predict_proba_batch(texts)?
            .iter()
            .map(|probabilities| self.rank(probabilities, k))
            .collect())
    }

    /// Best disease plus the probability of every disease.
    pub fn predict(&self, text: &str) -> Result<(String, HashMap<String, f32>), ClassifierError> {
        let probabilities = self.predict_proba(text)?;
        let best = self
            .rank(&probabilities, 1)
            .into_iter()
            .next()
            .map(|p| p.label)
            .ok_or_else(|| ClassifierError::PredictionError("No diseases to rank".into()))?;
        let scores = self
            .vocabulary
            .names()
            .iter()
            .cloned()
            .zip(probabilities)
            .collect();
        Ok((best, scores))
    }

    fn rank(&self, probabilities: &[f32], k: usize) -> Vec<Prediction> {
        top_k_indices(probabilities, k)
            .into_iter()
            .filter_map(|i| {
                self.vocabulary.name(i).map(|label| Prediction {
                    label: label.to_string(),
                    probability: probabilities[i],
                })
            })
            .collect()
    }
}
