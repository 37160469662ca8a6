use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use ndarray::{Array2, Ix2};
use ort::session::Session;
use ort::value::Tensor;

use super::error::ClassifierError;
use super::tokenizer::TokenBatch;
use super::SequenceClassifier;
use crate::runtime::{create_session_builder, RuntimeConfig};

/// Runs an exported sequence-classification graph through ONNX Runtime.
///
/// The graph must take `input_ids` and `attention_mask` (and optionally
/// `token_type_ids`) as `int64 [batch, seq_len]` and produce logits as its
/// first output, shaped `[batch, num_labels]`.
#[derive(Debug)]
pub struct OnnxClassifier {
    session: Arc<Session>,
    model_path: PathBuf,
    num_labels: usize,
    uses_token_types: bool,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<OnnxClassifier>();
    }
};

impl OnnxClassifier {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        num_labels: usize,
        config: &RuntimeConfig,
    ) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::BuildError(format!("Model file not found: {:?}", path)));
        }
        let session = create_session_builder(config)?.commit_from_file(path)?;
        Self::validate_model(&session)?;
        info!("ONNX model structure validated successfully");

        let uses_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");
        Ok(Self {
            session: Arc::new(session),
            model_path: path.to_path_buf(),
            num_labels,
            uses_token_types,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn validate_model(session: &Session) -> Result<(), ClassifierError> {
        let inputs = &session.inputs;
        if inputs.len() < 2 {
            return Err(ClassifierError::ModelError(format!(
                "Model must have at least 2 inputs (input_ids and attention_mask), found {}",
                inputs.len()
            )));
        }
        if session.outputs.is_empty() {
            return Err(ClassifierError::ModelError(
                "Model must have at least 1 output for logits".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_input_tensor(array: &Array2<u32>, name: &str) -> Result<Tensor<i64>, ClassifierError> {
    let input_dyn = array.mapv(i64::from).into_dyn();
    let input = input_dyn.as_standard_layout();
    Tensor::from_array(&input)
        .map_err(|e| ClassifierError::ModelError(format!("Failed to create {} tensor: {}", name, e)))
}

impl SequenceClassifier for OnnxClassifier {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn logits(&self, batch: &TokenBatch) -> Result<Array2<f32>, ClassifierError> {
        let mut input_tensors = HashMap::new();
        input_tensors.insert("input_ids", to_input_tensor(&batch.input_ids, "input_ids")?);
        input_tensors.insert("attention_mask", to_input_tensor(&batch.attention_mask, "attention_mask")?);
        if self.uses_token_types {
            input_tensors.insert("token_type_ids", to_input_tensor(&batch.token_type_ids, "token_type_ids")?);
        }

        let outputs = self
            .session
            .run(input_tensors)
            .map_err(|e| ClassifierError::ModelError(format!("Failed to run model: {}", e)))?;
        let output_tensor = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::ModelError(format!("Failed to extract output tensor: {}", e)))?;

        let shape = output_tensor.shape().to_vec();
        if shape.len() != 2 || shape[0] != batch.batch_size() || shape[1] != self.num_labels {
            return Err(ClassifierError::PredictionError(format!(
                "Expected logits of shape [{}, {}], got {:?}",
                batch.batch_size(),
                self.num_labels,
                shape
            )));
        }
        output_tensor
            .to_owned()
            .into_dimensionality::<Ix2>()
            .map_err(|e| ClassifierError::PredictionError(format!("Unexpected logits shape: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let err = OnnxClassifier::from_file("does/not/exist.onnx", 24, &RuntimeConfig::default()).unwrap_err();
        assert!(matches!(err, ClassifierError::BuildError(_)));
    }
}
