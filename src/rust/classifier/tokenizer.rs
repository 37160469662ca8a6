use std::fs;
use std::path::Path;
use std::str::FromStr;

use ndarray::Array2;
use serde_json::{json, Map, Value};
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use super::error::ClassifierError;

/// Sequence length used for both training and inference.
pub const DEFAULT_MAX_LENGTH: usize = 128;

const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";
const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";

/// Token ids, attention mask and segment ids of one text, each exactly
/// `max_length` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl TokenizedText {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions.
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

/// Row-major `[batch, seq_len]` model inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    pub input_ids: Array2<u32>,
    pub attention_mask: Array2<u32>,
    pub token_type_ids: Array2<u32>,
}

impl TokenBatch {
    /// Stacks equally long rows into a batch.
    pub fn from_rows(rows: &[&TokenizedText]) -> Result<Self, ClassifierError> {
        let seq_len = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != seq_len) {
            return Err(ClassifierError::ValidationError(format!(
                "Cannot batch sequences of different lengths ({} vs {})",
                bad.len(),
                seq_len
            )));
        }
        let stack = |field: fn(&TokenizedText) -> &[u32]| {
            let flat: Vec<u32> = rows.iter().flat_map(|&r| field(r).iter().copied()).collect();
            Array2::from_shape_vec((rows.len(), seq_len), flat).map_err(|e| {
                ClassifierError::ValidationError(format!("Failed to create input array: {}", e))
            })
        };
        Ok(Self {
            input_ids: stack(|r| r.input_ids.as_slice())?,
            attention_mask: stack(|r| r.attention_mask.as_slice())?,
            token_type_ids: stack(|r| r.token_type_ids.as_slice())?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// Wraps a pretrained subword tokenizer so that every text comes out as a
/// fixed-length, right-truncated and right-padded sequence.
///
/// Encoding is deterministic: the same text and tokenizer state always give
/// the same ids.
#[derive(Debug, Clone)]
pub struct TokenizerAdapter {
    tokenizer: Tokenizer,
    max_length: usize,
    pad_id: u32,
}

impl TokenizerAdapter {
    /// Configures `tokenizer` for fixed-length output.
    ///
    /// # Errors
    /// - `ValidationError` if `max_length` is zero
    /// - `TokenizerError` if truncation cannot be configured
    pub fn new(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self, ClassifierError> {
        if max_length == 0 {
            return Err(ClassifierError::ValidationError("max_length must be positive".into()));
        }
        let pad_id = tokenizer.token_to_id(PAD_TOKEN).unwrap_or(0);

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| ClassifierError::TokenizerError(format!("Failed to configure truncation: {}", e)))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id,
            pad_type_id: 0,
            pad_token: PAD_TOKEN.to_string(),
        }));

        Ok(Self {
            tokenizer,
            max_length,
            pad_id,
        })
    }

    /// Loads a serialized `tokenizer.json`.
    pub fn from_file<P: AsRef<Path>>(path: P, max_length: usize) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            log::error!("Failed to load tokenizer from {:?}: {}", path, e);
            ClassifierError::TokenizerError(format!("Failed to load tokenizer: {}", e))
        })?;
        Self::new(tokenizer, max_length)
    }

    /// Loads the tokenizer shipped in a model directory: `tokenizer.json` if
    /// present, otherwise a BERT WordPiece tokenizer built from `vocab.txt`.
    pub fn from_model_dir<P: AsRef<Path>>(dir: P, max_length: usize) -> Result<Self, ClassifierError> {
        let dir = dir.as_ref();
        let json_path = dir.join("tokenizer.json");
        if json_path.exists() {
            return Self::from_file(json_path, max_length);
        }
        let vocab_path = dir.join("vocab.txt");
        if vocab_path.exists() {
            log::info!("No tokenizer.json in {:?}, building WordPiece tokenizer from vocab.txt", dir);
            return Self::from_vocab_file(vocab_path, max_length);
        }
        Err(ClassifierError::TokenizerError(format!(
            "Neither tokenizer.json nor vocab.txt found in {:?}",
            dir
        )))
    }

    /// Builds an uncased BERT WordPiece tokenizer from a `vocab.txt` file.
    pub fn from_vocab_file<P: AsRef<Path>>(path: P, max_length: usize) -> Result<Self, ClassifierError> {
        let contents = fs::read_to_string(path)?;
        Self::from_wordpiece_vocab(contents.lines(), max_length)
    }

    /// Builds an uncased BERT WordPiece tokenizer; token ids follow the
    /// iteration order. The vocabulary must contain `[PAD]`, `[UNK]`,
    /// `[CLS]` and `[SEP]`.
    pub fn from_wordpiece_vocab<I, S>(tokens: I, max_length: usize) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Map::new();
        for (id, token) in tokens.into_iter().enumerate() {
            let token = token.as_ref().trim_end_matches('\r');
            if token.is_empty() {
                continue;
            }
            vocab.entry(token.to_string()).or_insert(json!(id));
        }
        let id_of = |token: &str| {
            vocab.get(token).and_then(Value::as_u64).ok_or_else(|| {
                ClassifierError::TokenizerError(format!("Vocabulary is missing the {} token", token))
            })
        };
        let cls_id = id_of(CLS_TOKEN)?;
        let sep_id = id_of(SEP_TOKEN)?;
        id_of(PAD_TOKEN)?;
        id_of(UNK_TOKEN)?;

        let config = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": { "type": "BertPreTokenizer" },
            "post_processor": {
                "type": "BertProcessing",
                "sep": [SEP_TOKEN, sep_id],
                "cls": [CLS_TOKEN, cls_id]
            },
            "decoder": {
                "type": "WordPiece",
                "prefix": "##",
                "cleanup": true
            },
            "model": {
                "type": "WordPiece",
                "unk_token": UNK_TOKEN,
                "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100,
                "vocab": Value::Object(vocab)
            }
        });
        let tokenizer = Tokenizer::from_str(&config.to_string())
            .map_err(|e| ClassifierError::TokenizerError(format!("Failed to build WordPiece tokenizer: {}", e)))?;
        Self::new(tokenizer, max_length)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Counts tokens (special tokens included) before truncation or padding.
    pub fn count_tokens(&self, text: &str) -> Result<usize, ClassifierError> {
        let mut raw = self.tokenizer.clone();
        raw.with_padding(None);
        raw.with_truncation(None)
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))?;
        raw.encode(text, true)
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))
            .map(|encoding| encoding.get_ids().len())
    }

    /// Encodes one text to exactly `max_length` positions.
    pub fn encode(&self, text: &str) -> Result<TokenizedText, ClassifierError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))?;
        self.to_tokenized(&encoding)
    }

    /// Encodes many texts at once, preserving input order.
    pub fn encode_batch(&self, texts: &[&str]) -> Result<Vec<TokenizedText>, ClassifierError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))?;
        encodings.iter().map(|e| self.to_tokenized(e)).collect()
    }

    /// Encodes texts straight into a model-ready batch.
    pub fn encode_to_batch(&self, texts: &[&str]) -> Result<TokenBatch, ClassifierError> {
        let rows = self.encode_batch(texts)?;
        let refs: Vec<&TokenizedText> = rows.iter().collect();
        TokenBatch::from_rows(&refs)
    }

    /// Writes the tokenizer as `tokenizer.json`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassifierError> {
        self.tokenizer
            .save(path, false)
            .map_err(|e| ClassifierError::TokenizerError(format!("Failed to save tokenizer: {}", e)))
    }

    fn to_tokenized(&self, encoding: &tokenizers::Encoding) -> Result<TokenizedText, ClassifierError> {
        let tokenized = TokenizedText {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            token_type_ids: encoding.get_type_ids().to_vec(),
        };
        if tokenized.len() != self.max_length {
            return Err(ClassifierError::TokenizerError(format!(
                "Encoded length {} does not match max_length {}",
                tokenized.len(),
                self.max_length
            )));
        }
        Ok(tokenized)
    }
}
