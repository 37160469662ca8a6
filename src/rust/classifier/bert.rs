use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use log::{info, warn};
use ndarray::Array2;
use serde_json::{json, Value};

use super::error::ClassifierError;
use super::tokenizer::{TokenBatch, TokenizerAdapter};
use super::SequenceClassifier;

/// Dropout applied to the pooled output during training, as in
/// `BertForSequenceClassification`.
pub const DEFAULT_CLASSIFIER_DROPOUT: f32 = 0.1;

const WEIGHT_FILES: [&str; 2] = ["model.safetensors", "pytorch_model.bin"];

/// Fields older `config.json` files omit, with the values `transformers`
/// assumes for them.
fn bert_config_defaults() -> [(&'static str, Value); 7] {
    [
        ("hidden_act", json!("gelu")),
        ("hidden_dropout_prob", json!(0.1)),
        ("type_vocab_size", json!(2)),
        ("initializer_range", json!(0.02)),
        ("layer_norm_eps", json!(1e-12)),
        ("pad_token_id", json!(0)),
        ("position_embedding_type", json!("absolute")),
    ]
}

/// Fills in the `transformers` defaults for fields the config leaves out.
/// Present fields, including explicit nulls, are kept.
pub fn with_bert_defaults(mut config: Value) -> Value {
    if let Value::Object(map) = &mut config {
        for (key, default) in bert_config_defaults() {
            map.entry(key).or_insert(default);
        }
    }
    config
}

/// Parses an encoder config after filling in the `transformers` defaults.
pub fn parse_bert_config(config: &Value) -> Result<BertConfig, serde_json::Error> {
    serde_json::from_value(with_bert_defaults(config.clone()))
}

/// BERT encoder with a pooler and a multi-label classification head.
///
/// Parameter names follow the Hugging Face layout (`bert.*`,
/// `bert.pooler.dense.*`, `classifier.*`), so pretrained checkpoints and
/// fine-tuned artifacts load without renaming.
pub struct BertClassifier {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    dropout: f32,
    num_labels: usize,
    device: Device,
}

impl std::fmt::Debug for BertClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertClassifier")
            .field("num_labels", &self.num_labels)
            .field("dropout", &self.dropout)
            .field("device", &self.device)
            .finish()
    }
}

impl BertClassifier {
    /// Builds the network from whatever backs `vb`: a parameter map when
    /// training, memory-mapped safetensors when serving.
    pub fn load(
        vb: VarBuilder,
        config: &BertConfig,
        num_labels: usize,
        dropout: f32,
    ) -> candle_core::Result<Self> {
        let device = vb.device().clone();
        let bert = BertModel::load(vb.pp("bert"), config)?;
        let pooler = candle_nn::linear(config.hidden_size, config.hidden_size, vb.pp("bert.pooler.dense"))?;
        let classifier = candle_nn::linear(config.hidden_size, num_labels, vb.pp("classifier"))?;
        Ok(Self {
            bert,
            pooler,
            classifier,
            dropout,
            num_labels,
            device,
        })
    }

    /// Creates a trainable model whose parameters live in `varmap`.
    pub fn new_trainable(
        varmap: &VarMap,
        config: &BertConfig,
        num_labels: usize,
        dropout: f32,
        device: &Device,
    ) -> candle_core::Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Self::load(vb, config, num_labels, dropout)
    }

    /// Loads fine-tuned weights from a safetensors file.
    pub fn from_safetensors(
        weights: &Path,
        config: &BertConfig,
        num_labels: usize,
        device: &Device,
    ) -> Result<Self, ClassifierError> {
        info!("Loading classifier weights from {:?}", weights);
        // SAFETY: the file is opened read-only and outlives the VarBuilder.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        Self::load(vb, config, num_labels, 0.0).map_err(|e| {
            ClassifierError::ModelError(format!("Failed to load BERT classifier: {}", e))
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns raw logits of shape `[batch, num_labels]`. Dropout is only
    /// active when `train` is set.
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let hidden = self.bert.forward(input_ids, token_type_ids, Some(attention_mask))?;
        // [CLS] token is at position 0
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let pooled = if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(&pooled, self.dropout)?
        } else {
            pooled
        };
        self.classifier.forward(&pooled)
    }

    fn to_tensor(&self, array: &Array2<u32>) -> candle_core::Result<Tensor> {
        Tensor::from_iter(array.iter().copied(), &self.device)?.reshape(array.dim())
    }
}

impl SequenceClassifier for BertClassifier {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn logits(&self, batch: &TokenBatch) -> Result<Array2<f32>, ClassifierError> {
        let input_ids = self.to_tensor(&batch.input_ids)?;
        let attention_mask = self.to_tensor(&batch.attention_mask)?;
        let token_type_ids = self.to_tensor(&batch.token_type_ids)?;
        let logits = self
            .forward_t(&input_ids, &attention_mask, &token_type_ids, false)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;
        let rows = logits.len();
        let flat: Vec<f32> = logits.into_iter().flatten().collect();
        Array2::from_shape_vec((rows, self.num_labels), flat).map_err(|e| {
            ClassifierError::PredictionError(format!("Unexpected logits shape: {}", e))
        })
    }
}

/// A pretrained encoder directory: `config.json`, a tokenizer and weights
/// (`model.safetensors` or `pytorch_model.bin`).
#[derive(Debug, Clone)]
pub struct PretrainedEncoder {
    pub dir: PathBuf,
    pub config_json: Value,
    pub config: BertConfig,
    pub weights: PathBuf,
}

impl PretrainedEncoder {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref().to_path_buf();
        let config_path = dir.join("config.json");
        if !config_path.exists() {
            return Err(ClassifierError::BuildError(format!(
                "Encoder config not found: {:?}",
                config_path
            )));
        }
        let config_json = with_bert_defaults(serde_json::from_str(&std::fs::read_to_string(&config_path)?)?);
        let config: BertConfig = serde_json::from_value(config_json.clone())
            .map_err(|e| ClassifierError::BuildError(format!("Invalid BERT config: {}", e)))?;

        let weights = WEIGHT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| {
                ClassifierError::BuildError(format!(
                    "No encoder weights ({}) found in {:?}",
                    WEIGHT_FILES.join(" or "),
                    dir
                ))
            })?;

        Ok(Self {
            dir,
            config_json,
            config,
            weights,
        })
    }

    pub fn tokenizer(&self, max_length: usize) -> Result<TokenizerAdapter, ClassifierError> {
        TokenizerAdapter::from_model_dir(&self.dir, max_length)
    }

    /// Copies the encoder weights into `varmap`.
    pub fn load_into(&self, varmap: &VarMap, device: &Device) -> Result<WeightLoadReport, ClassifierError> {
        load_pretrained_weights(varmap, &self.weights, device)
    }
}

/// Outcome of copying a checkpoint into a parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightLoadReport {
    /// Parameters overwritten from the checkpoint.
    pub loaded: Vec<String>,
    /// Parameters absent from the checkpoint; they keep their fresh init.
    pub newly_initialized: Vec<String>,
}

/// Copies every tensor of a `.safetensors` or PyTorch checkpoint whose name
/// matches a parameter in `varmap`.
///
/// Legacy `gamma`/`beta` layer-norm names are read as `weight`/`bias`, and
/// checkpoints saved without the `bert.` prefix are matched too.
pub fn load_pretrained_weights(
    varmap: &VarMap,
    path: &Path,
    device: &Device,
) -> Result<WeightLoadReport, ClassifierError> {
    info!("Loading pretrained weights from {:?}", path);
    let raw: Vec<(String, Tensor)> = if path.extension().is_some_and(|e| e == "safetensors") {
        candle_core::safetensors::load(path, &Device::Cpu)?.into_iter().collect()
    } else {
        candle_core::pickle::read_all(path)?
    };
    let tensors: HashMap<String, Tensor> = raw
        .into_iter()
        .map(|(name, t)| (canonical_name(&name), t))
        .collect();

    let data = varmap
        .data()
        .lock()
        .map_err(|_| ClassifierError::ModelError("Parameter map lock poisoned".into()))?;

    let mut report = WeightLoadReport::default();
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();
    for name in names {
        let source = tensors
            .get(name.as_str())
            .or_else(|| name.strip_prefix("bert.").and_then(|n| tensors.get(n)));
        match source {
            Some(tensor) => {
                let value = tensor.to_dtype(DType::F32)?.to_device(device)?;
                data[name].set(&value).map_err(|e| {
                    ClassifierError::ModelError(format!("Cannot load '{}' from checkpoint: {}", name, e))
                })?;
                report.loaded.push(name.clone());
            }
            None => report.newly_initialized.push(name.clone()),
        }
    }

    info!("Loaded {} pretrained tensors", report.loaded.len());
    if !report.newly_initialized.is_empty() {
        warn!(
            "Some weights were not found in the checkpoint and are newly initialized: {:?}",
            report.newly_initialized
        );
    }
    Ok(report)
}

fn canonical_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".gamma") {
        format!("{}.weight", stem)
    } else if let Some(stem) = name.strip_suffix(".beta") {
        format!("{}.bias", stem)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_layer_norm_names() {
        assert_eq!(
            canonical_name("bert.embeddings.LayerNorm.gamma"),
            "bert.embeddings.LayerNorm.weight"
        );
        assert_eq!(canonical_name("bert.embeddings.LayerNorm.beta"), "bert.embeddings.LayerNorm.bias");
        assert_eq!(canonical_name("classifier.weight"), "classifier.weight");
    }

    #[test]
    fn test_defaults_fill_only_missing_fields() {
        let config = with_bert_defaults(json!({"hidden_size": 32, "layer_norm_eps": 1e-5}));
        assert_eq!(config["layer_norm_eps"], 1e-5);
        assert_eq!(config["pad_token_id"], 0);
        assert_eq!(config["hidden_act"], "gelu");
        assert_eq!(config["position_embedding_type"], "absolute");
        assert_eq!(config["hidden_size"], 32);
        assert_eq!(with_bert_defaults(json!(null)), json!(null));
    }

    #[test]
    fn test_encoder_config_without_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config = json!({
            "vocab_size": 30,
            "hidden_size": 32,
            "num_hidden_layers": 1,
            "num_attention_heads": 4,
            "intermediate_size": 64,
            "max_position_embeddings": 64
        });
        std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();

        let encoder = PretrainedEncoder::from_dir(dir.path()).unwrap();
        assert_eq!(encoder.config.hidden_size, 32);
        assert_eq!(encoder.config_json["layer_norm_eps"], 1e-12);
        assert_eq!(encoder.config_json["pad_token_id"], 0);
        assert!(parse_bert_config(&config).is_ok());
    }

    #[test]
    fn test_missing_encoder_dir_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PretrainedEncoder::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ClassifierError::BuildError(_)));
    }
}
