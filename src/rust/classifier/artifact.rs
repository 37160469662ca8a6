//! On-disk layout of a fine-tuned classifier.
//!
//! ```text
//! <dir>/
//!   model.safetensors | model.onnx
//!   config.json      encoder config plus num_labels, id2label, label2id
//!   tokenizer.json
//!   diseases.txt     one label per line, line order = output index
//!   checksums.json   sha256 of every file above
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use candle_nn::VarMap;
use candle_transformers::models::bert::Config as BertConfig;
use log::info;
use serde_json::{json, Map, Value};

use super::bert::{parse_bert_config, BertClassifier};
use super::error::ClassifierError;
use super::onnx::OnnxClassifier;
use super::tokenizer::TokenizerAdapter;
use super::SequenceClassifier;
use crate::data::DiseaseVocabulary;
use crate::integrity::{Checksums, CHECKSUMS_FILE};
use crate::runtime::RuntimeConfig;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const ONNX_WEIGHTS_FILE: &str = "model.onnx";
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCABULARY_FILE: &str = "diseases.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsFormat {
    Safetensors,
    Onnx,
}

/// A validated model directory. Holding one means every file is present,
/// matches `checksums.json`, and the label count agrees with `diseases.txt`.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    dir: PathBuf,
    weights: PathBuf,
    format: WeightsFormat,
    config: Value,
    vocabulary: DiseaseVocabulary,
    max_length: Option<usize>,
}

impl ModelArtifact {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(ClassifierError::ArtifactError(format!(
                "Model directory not found: {:?}",
                dir
            )));
        }

        let (weights_name, format) = if dir.join(WEIGHTS_FILE).exists() {
            (WEIGHTS_FILE, WeightsFormat::Safetensors)
        } else if dir.join(ONNX_WEIGHTS_FILE).exists() {
            (ONNX_WEIGHTS_FILE, WeightsFormat::Onnx)
        } else {
            return Err(ClassifierError::ArtifactError(format!(
                "No model weights ({} or {}) in {:?}",
                WEIGHTS_FILE, ONNX_WEIGHTS_FILE, dir
            )));
        };
        let required = [weights_name, CONFIG_FILE, TOKENIZER_FILE, VOCABULARY_FILE, CHECKSUMS_FILE];
        if let Some(missing) = required.iter().find(|name| !dir.join(name).exists()) {
            return Err(ClassifierError::ArtifactError(format!(
                "Required file {} is missing from {:?}",
                missing, dir
            )));
        }

        let checksums = Checksums::load(&dir)
            .map_err(|e| ClassifierError::ArtifactError(format!("Unreadable {}: {}", CHECKSUMS_FILE, e)))?;
        if let Some(uncovered) = required[..4].iter().find(|name| !checksums.contains(name)) {
            return Err(ClassifierError::ArtifactError(format!(
                "{} has no entry for {}",
                CHECKSUMS_FILE, uncovered
            )));
        }
        let mismatches = checksums.verify(&dir)?;
        if !mismatches.is_empty() {
            let details: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
            return Err(ClassifierError::ArtifactError(format!(
                "Checksum verification failed: {}",
                details.join("; ")
            )));
        }

        let vocabulary = DiseaseVocabulary::from_file(dir.join(VOCABULARY_FILE))?;
        let config: Value = serde_json::from_str(&fs::read_to_string(dir.join(CONFIG_FILE))?)?;
        check_label_agreement(&config, &vocabulary)?;
        let tokenizer_json: Value = serde_json::from_str(&fs::read_to_string(dir.join(TOKENIZER_FILE))?)?;
        let max_length = saved_max_length(&tokenizer_json);

        info!(
            "Opened model artifact {:?} ({:?}, {} labels)",
            dir,
            format,
            vocabulary.len()
        );
        Ok(Self {
            weights: dir.join(weights_name),
            dir,
            format,
            config,
            vocabulary,
            max_length,
        })
    }

    /// Writes a complete artifact from a trained parameter map and returns
    /// it re-opened, so the result has passed the same checks as a load.
    pub fn save<P: AsRef<Path>>(
        dir: P,
        varmap: &VarMap,
        encoder_config: &Value,
        tokenizer: &TokenizerAdapter,
        vocabulary: &DiseaseVocabulary,
    ) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        varmap.save(dir.join(WEIGHTS_FILE))?;
        Self::finish(dir, WEIGHTS_FILE, encoder_config, tokenizer, vocabulary)
    }

    /// Packages an exported classification graph as an artifact. The graph's
    /// logits must follow `vocabulary` order.
    pub fn import_onnx<P: AsRef<Path>, Q: AsRef<Path>>(
        dir: P,
        onnx_model: Q,
        encoder_config: &Value,
        tokenizer: &TokenizerAdapter,
        vocabulary: &DiseaseVocabulary,
    ) -> Result<Self, ClassifierError> {
        let (dir, onnx_model) = (dir.as_ref(), onnx_model.as_ref());
        if !onnx_model.is_file() {
            return Err(ClassifierError::ArtifactError(format!(
                "ONNX model not found: {:?}",
                onnx_model
            )));
        }
        fs::create_dir_all(dir)?;
        if dir.join(WEIGHTS_FILE).exists() {
            return Err(ClassifierError::ArtifactError(format!(
                "{:?} already holds {}",
                dir, WEIGHTS_FILE
            )));
        }
        fs::copy(onnx_model, dir.join(ONNX_WEIGHTS_FILE))?;
        Self::finish(dir, ONNX_WEIGHTS_FILE, encoder_config, tokenizer, vocabulary)
    }

    /// Writes the metadata files and checksums next to `weights_name`, then
    /// re-opens the directory.
    fn finish(
        dir: &Path,
        weights_name: &str,
        encoder_config: &Value,
        tokenizer: &TokenizerAdapter,
        vocabulary: &DiseaseVocabulary,
    ) -> Result<Self, ClassifierError> {
        let config = classification_config(encoder_config, vocabulary);
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&config)?)?;
        tokenizer.save(dir.join(TOKENIZER_FILE))?;
        vocabulary.save(dir.join(VOCABULARY_FILE))?;

        let checksums = Checksums::compute(dir, [weights_name, CONFIG_FILE, TOKENIZER_FILE, VOCABULARY_FILE])?;
        checksums.save(dir)?;
        info!("Saved model artifact to {:?}", dir);

        Self::open(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights
    }

    pub fn format(&self) -> WeightsFormat {
        self.format
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn vocabulary(&self) -> &DiseaseVocabulary {
        &self.vocabulary
    }

    /// Sequence length the tokenizer was saved with, if it records one.
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn tokenizer(&self, max_length: usize) -> Result<TokenizerAdapter, ClassifierError> {
        TokenizerAdapter::from_file(self.dir.join(TOKENIZER_FILE), max_length)
    }

    /// Instantiates the classifier backend matching the weights format.
    pub fn load_classifier(
        &self,
        device: &Device,
        runtime: &RuntimeConfig,
    ) -> Result<Box<dyn SequenceClassifier>, ClassifierError> {
        let num_labels = self.vocabulary.len();
        match self.format {
            WeightsFormat::Safetensors => {
                let config: BertConfig = parse_bert_config(&self.config)
                    .map_err(|e| ClassifierError::ArtifactError(format!("Invalid BERT config: {}", e)))?;
                let model = BertClassifier::from_safetensors(&self.weights, &config, num_labels, device)?;
                Ok(Box::new(model))
            }
            WeightsFormat::Onnx => Ok(Box::new(OnnxClassifier::from_file(&self.weights, num_labels, runtime)?)),
        }
    }
}

fn saved_max_length(tokenizer_json: &Value) -> Option<usize> {
    tokenizer_json
        .pointer("/truncation/max_length")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

/// Extends an encoder config with the multi-label classification fields.
pub fn classification_config(encoder_config: &Value, vocabulary: &DiseaseVocabulary) -> Value {
    let mut config = match encoder_config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let id2label: Map<String, Value> = vocabulary
        .names()
        .iter()
        .enumerate()
        .map(|(i, name)| (i.to_string(), json!(name)))
        .collect();
    let label2id: Map<String, Value> = vocabulary
        .names()
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), json!(i)))
        .collect();

    config.insert("architectures".into(), json!(["BertForSequenceClassification"]));
    config.insert("problem_type".into(), json!("multi_label_classification"));
    config.insert("num_labels".into(), json!(vocabulary.len()));
    config.insert("id2label".into(), Value::Object(id2label));
    config.insert("label2id".into(), Value::Object(label2id));
    Value::Object(config)
}

fn check_label_agreement(config: &Value, vocabulary: &DiseaseVocabulary) -> Result<(), ClassifierError> {
    let declared = config
        .get("num_labels")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .or_else(|| config.get("id2label").and_then(Value::as_object).map(Map::len));
    if let Some(n) = declared {
        if n != vocabulary.len() {
            return Err(ClassifierError::ArtifactError(format!(
                "Model declares {} labels but {} lists {}",
                n,
                VOCABULARY_FILE,
                vocabulary.len()
            )));
        }
    }
    if let Some(id2label) = config.get("id2label").and_then(Value::as_object) {
        for (i, name) in vocabulary.names().iter().enumerate() {
            if let Some(declared) = id2label.get(&i.to_string()).and_then(Value::as_str) {
                if declared != name {
                    return Err(ClassifierError::ArtifactError(format!(
                        "Label {} is '{}' in {} but '{}' in {}",
                        i, declared, CONFIG_FILE, name, VOCABULARY_FILE
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_config_fields() {
        let vocab = DiseaseVocabulary::new(["Acne", "Migraine"]).unwrap();
        let config = classification_config(&json!({"hidden_size": 32}), &vocab);
        assert_eq!(config["hidden_size"], 32);
        assert_eq!(config["num_labels"], 2);
        assert_eq!(config["problem_type"], "multi_label_classification");
        assert_eq!(config["id2label"]["1"], "Migraine");
        assert_eq!(config["label2id"]["Acne"], 0);
    }

    #[test]
    fn test_label_count_disagreement() {
        let vocab = DiseaseVocabulary::new(["Acne", "Migraine"]).unwrap();
        let err = check_label_agreement(&json!({"num_labels": 3}), &vocab).unwrap_err();
        assert!(matches!(err, ClassifierError::ArtifactError(_)));

        let swapped = json!({"id2label": {"0": "Migraine", "1": "Acne"}});
        assert!(check_label_agreement(&swapped, &vocab).is_err());
        assert!(check_label_agreement(&json!({}), &vocab).is_ok());
    }

    #[test]
    fn test_saved_max_length() {
        let tokenizer_json = json!({"truncation": {"max_length": 64, "strategy": "LongestFirst"}});
        assert_eq!(saved_max_length(&tokenizer_json), Some(64));
        assert_eq!(saved_max_length(&json!({"truncation": null})), None);
    }

    #[test]
    fn test_open_missing_directory() {
        let err = ModelArtifact::open("no/such/model").unwrap_err();
        assert!(matches!(err, ClassifierError::ArtifactError(_)));
    }
}
