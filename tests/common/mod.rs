#![allow(dead_code)]

pub mod onnx;

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use ndarray::Array2;
use serde_json::{json, Value};
use symptom_classifier::classifier::TokenBatch;
use symptom_classifier::{
    ClassifierError, DiseaseVocabulary, InferenceEngine, ModelArtifact, RawRecord, SequenceClassifier,
    TokenizerAdapter,
};

pub const MAX_LENGTH: usize = 16;

pub const DISEASES: [&str; 4] = ["Migraine", "Common Cold", "Psoriasis", "Urinary Tract Infection"];

/// WordPiece vocabulary covering the fixture sentences.
pub fn vocab_tokens() -> Vec<&'static str> {
    vec![
        "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "i", "have", "a", "my", "and", "the", "is", "of", "it",
        "headache", "head", "throbbing", "light", "hurts", "fever", "cough", "sore", "throat", "runny", "nose",
        "rash", "itchy", "skin", "scaly", "patches", "burning", "urination", "pain", "frequent", "bladder",
        ",", ".",
    ]
}

pub fn tokenizer() -> TokenizerAdapter {
    TokenizerAdapter::from_wordpiece_vocab(vocab_tokens(), MAX_LENGTH).unwrap()
}

pub fn vocabulary() -> DiseaseVocabulary {
    DiseaseVocabulary::new(DISEASES).unwrap()
}

/// A two-layer, 32-wide BERT config.
pub fn tiny_bert_config() -> Value {
    json!({
        "architectures": ["BertModel"],
        "model_type": "bert",
        "vocab_size": vocab_tokens().len(),
        "hidden_size": 32,
        "num_hidden_layers": 2,
        "num_attention_heads": 4,
        "intermediate_size": 64,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": 64,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": true
    })
}

/// Writes a randomly initialized pretrained encoder (`config.json`,
/// `vocab.txt`, `model.safetensors`) into `dir`.
pub fn write_pretrained_encoder(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let config_json = tiny_bert_config();
    let config: BertConfig = serde_json::from_value(config_json.clone()).unwrap();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertModel::load(vb.pp("bert"), &config).unwrap();
    candle_nn::linear(config.hidden_size, config.hidden_size, vb.pp("bert.pooler.dense")).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();

    fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config_json).unwrap()).unwrap();
    fs::write(dir.join("vocab.txt"), vocab_tokens().join("\n")).unwrap();
}

/// Writes a complete, checksummed model directory with random weights.
pub fn write_random_artifact(dir: &Path, vocab: &DiseaseVocabulary) -> ModelArtifact {
    let config_json = tiny_bert_config();
    let config: BertConfig = serde_json::from_value(config_json.clone()).unwrap();
    let varmap = VarMap::new();
    symptom_classifier::classifier::BertClassifier::new_trainable(&varmap, &config, vocab.len(), 0.1, &Device::Cpu)
        .unwrap();
    ModelArtifact::save(dir, &varmap, &config_json, &tokenizer(), vocab).unwrap()
}

/// Five descriptions per fixture disease.
pub fn records() -> Vec<RawRecord> {
    let rows = [
        ("i have a throbbing headache", "Migraine"),
        ("my head hurts and the light hurts", "Migraine"),
        ("throbbing head pain", "Migraine"),
        ("headache and light", "Migraine"),
        ("my headache is throbbing", "Migraine"),
        ("i have a fever and a cough", "Common Cold"),
        ("sore throat and runny nose", "Common Cold"),
        ("cough, fever, sore throat", "Common Cold"),
        ("my nose is runny", "Common Cold"),
        ("fever and cough", "Common Cold"),
        ("i have an itchy rash", "Psoriasis"),
        ("scaly patches of skin", "Psoriasis"),
        ("my skin is itchy and scaly", "Psoriasis"),
        ("rash and scaly skin", "Psoriasis"),
        ("itchy patches", "Psoriasis"),
        ("burning urination", "Urinary Tract Infection"),
        ("frequent urination and bladder pain", "Urinary Tract Infection"),
        ("it is burning and frequent", "Urinary Tract Infection"),
        ("bladder pain", "Urinary Tract Infection"),
        ("burning bladder", "Urinary Tract Infection"),
    ];
    rows.iter().map(|(text, label)| RawRecord::new(*text, *label)).collect()
}

pub fn write_csv(path: &Path, records: &[RawRecord]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(["", "label", "text"]).unwrap();
    for (i, record) in records.iter().enumerate() {
        writer
            .write_record([i.to_string().as_str(), record.label.as_str(), record.text.as_str()])
            .unwrap();
    }
    writer.flush().unwrap();
}

/// Scores a disease high when the input mentions one of its keywords.
pub struct KeywordClassifier {
    keywords: Vec<Vec<u32>>,
}

impl KeywordClassifier {
    pub fn new(tokenizer: &TokenizerAdapter) -> Self {
        let groups: [&[&str]; 4] = [
            &["headache", "throbbing", "light"],
            &["fever", "cough", "throat"],
            &["rash", "itchy", "scaly"],
            &["urination", "bladder", "burning"],
        ];
        let keywords = groups
            .iter()
            .map(|words| {
                words
                    .iter()
                    .filter_map(|w| tokenizer.inner().token_to_id(w))
                    .collect()
            })
            .collect();
        Self { keywords }
    }
}

impl SequenceClassifier for KeywordClassifier {
    fn num_labels(&self) -> usize {
        self.keywords.len()
    }

    fn logits(&self, batch: &TokenBatch) -> Result<Array2<f32>, ClassifierError> {
        let rows = batch.batch_size();
        let mut logits = Array2::from_elem((rows, self.keywords.len()), -4.0f32);
        for (row, ids) in batch.input_ids.outer_iter().enumerate() {
            for (label, words) in self.keywords.iter().enumerate() {
                let hits = ids.iter().filter(|&&id| words.contains(&id)).count();
                logits[[row, label]] += 3.0 * hits as f32;
            }
        }
        Ok(logits)
    }
}

pub fn keyword_engine() -> InferenceEngine {
    let tokenizer = tokenizer();
    InferenceEngine::new(Box::new(KeywordClassifier::new(&tokenizer)), tokenizer, vocabulary()).unwrap()
}
