//! Multi-label disease classification from free-text symptom descriptions.
//!
//! A BERT-style encoder is fine-tuned on labelled descriptions, saved as a
//! self-contained model directory, and served through an [`InferenceEngine`]
//! that scores every disease independently.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use symptom_classifier::InferenceEngine;
//!
//! let engine = InferenceEngine::builder()
//!     .with_model_dir("models/symptom-classifier")?
//!     .build()?;
//!
//! for prediction in engine.predict_top_k("Throbbing headache and light sensitivity", 3)? {
//!     println!("{} ({:.1}%)", prediction.label, prediction.probability * 100.0);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Prediction never mutates the engine, so one instance can be shared
//! through `Arc`:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use std::thread;
//! use symptom_classifier::InferenceEngine;
//!
//! let engine = Arc::new(InferenceEngine::from_model_dir("models/symptom-classifier")?);
//!
//! let handles: Vec<_> = (0..3)
//!     .map(|_| {
//!         let engine = Arc::clone(&engine);
//!         thread::spawn(move || engine.predict_top_k("fever and chills", 3).map(|p| p.len()))
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod classifier;
pub mod data;
pub mod device;
pub mod integrity;
pub mod model_manager;
pub mod runtime;
pub mod server;
pub mod training;

pub use assistant::{detect_intent, Assistant, AssistantReply, Intent};
pub use classifier::{
    ClassifierError, ClassifierInfo, EngineBuilder, InferenceEngine, ModelArtifact, Prediction, PretrainedEncoder,
    SequenceClassifier, TokenizerAdapter,
};
pub use data::{load_records, DataError, DiseaseVocabulary, LabelBinarizer, RawRecord, DEFAULT_DISEASES};
pub use device::select_device;
pub use model_manager::{ModelError, ModelManager, DEFAULT_PRETRAINED_MODEL};
pub use runtime::{create_session_builder, RuntimeConfig};
pub use training::{train, train_from_csv, TrainingConfig, TrainingError, TrainingReport};

pub fn init_logger() {
    env_logger::init();
}
