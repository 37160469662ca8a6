use std::path::Path;

use candle_core::Device;
use log::info;

use super::artifact::{ModelArtifact, WeightsFormat};
use super::error::ClassifierError;
use super::inference::InferenceEngine;
use super::tokenizer::DEFAULT_MAX_LENGTH;
use crate::device::select_device;
use crate::runtime::RuntimeConfig;

/// Text used to check that a loaded model produces one score per disease.
const PROBE_TEXT: &str = "Test input to infer the number of labels";

/// A builder for constructing an [`InferenceEngine`] with a fluent interface.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    artifact: Option<ModelArtifact>,
    device: Option<Device>,
    force_cpu: bool,
    max_length: Option<usize>,
    runtime_config: RuntimeConfig,
}

impl EngineBuilder {
    /// Creates a new empty EngineBuilder instance with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the runtime configuration used when the artifact holds an ONNX
    /// graph.
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Runs the model on `device` instead of probing for an accelerator.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Skips accelerator probing and runs on the CPU.
    pub fn force_cpu(mut self, force_cpu: bool) -> Self {
        self.force_cpu = force_cpu;
        self
    }

    /// Overrides the sequence length. Defaults to the length the model was
    /// saved with, else 128.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets the trained model directory to load.
    ///
    /// The directory is validated immediately: every required file must be
    /// present and match `checksums.json`.
    ///
    /// # Errors
    /// - `BuildError` if a model directory was already set
    /// - `ArtifactError` if the directory is incomplete or corrupted
    pub fn with_model_dir<P: AsRef<Path>>(mut self, dir: P) -> Result<Self, ClassifierError> {
        if self.artifact.is_some() {
            return Err(ClassifierError::BuildError("Model directory already set".to_string()));
        }
        self.artifact = Some(ModelArtifact::open(dir)?);
        Ok(self)
    }

    /// Loads tokenizer and weights, then checks the model's output width
    /// against the disease vocabulary with a probe prediction.
    pub fn build(self) -> Result<InferenceEngine, ClassifierError> {
        let artifact = self
            .artifact
            .ok_or_else(|| ClassifierError::BuildError("Model directory must be set".to_string()))?;
        let device = match self.device {
            Some(device) => device,
            None => select_device(self.force_cpu),
        };
        let max_length = self
            .max_length
            .or_else(|| artifact.max_length())
            .unwrap_or(DEFAULT_MAX_LENGTH);

        let tokenizer = artifact.tokenizer(max_length)?;
        info!("Tokenizer loaded successfully");
        let classifier = artifact.load_classifier(&device, &self.runtime_config)?;
        let backend = match artifact.format() {
            WeightsFormat::Safetensors => format!("candle ({:?})", device),
            WeightsFormat::Onnx => "onnxruntime".to_string(),
        };

        let engine = InferenceEngine::new(classifier, tokenizer, artifact.vocabulary().clone())?
            .with_source(artifact.dir(), &backend);
        let probe = engine.predict_proba(PROBE_TEXT)?;
        if probe.len() != artifact.vocabulary().len() {
            return Err(ClassifierError::ArtifactError(format!(
                "Model produced {} scores for {} diseases",
                probe.len(),
                artifact.vocabulary().len()
            )));
        }
        info!("Inference engine ready: {} labels on {}", probe.len(), backend);
        Ok(engine)
    }
}
