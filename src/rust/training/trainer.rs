use std::fs;
use std::path::Path;

use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::batches::{BatchIterator, TensorDataset};
use super::metrics::{bce_with_logits, macro_f1, EvalMetrics};
use super::{TrainingConfig, TrainingError};
use crate::classifier::utils::sigmoid_rows;
use crate::classifier::{
    classification_config, BertClassifier, PretrainedEncoder, WeightLoadReport, CONFIG_FILE, WEIGHTS_FILE,
};
use crate::data::{DiseaseVocabulary, PreparedDataset};

pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const TRAINING_CONFIG_FILE: &str = "training_config.json";

/// Summary of one finished epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    pub global_step: usize,
    pub train_loss: f64,
    pub eval_loss: f64,
    pub eval_f1_macro: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: usize,
    pub epoch: f64,
    pub loss: f64,
    pub learning_rate: f64,
}

/// Progress written to `trainer_state.json` in every checkpoint and in the
/// output directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    pub max_steps: usize,
    pub epoch: usize,
    pub log_history: Vec<LogEntry>,
    pub epochs: Vec<EpochMetrics>,
}

/// Fine-tunes a [`BertClassifier`] whose parameters live in a [`VarMap`].
pub struct Trainer {
    config: TrainingConfig,
    device: Device,
    varmap: VarMap,
    model: BertClassifier,
    model_config: Value,
    state: TrainerState,
}

impl Trainer {
    /// Builds the classifier, copies the encoder weights into it and leaves
    /// the classification head freshly initialized.
    pub fn new(
        encoder: &PretrainedEncoder,
        vocabulary: &DiseaseVocabulary,
        config: TrainingConfig,
        device: Device,
    ) -> Result<(Self, WeightLoadReport), TrainingError> {
        let varmap = VarMap::new();
        let model = BertClassifier::new_trainable(
            &varmap,
            &encoder.config,
            vocabulary.len(),
            config.classifier_dropout,
            &device,
        )?;
        let report = encoder.load_into(&varmap, &device)?;
        let trainer = Self {
            config,
            device,
            varmap,
            model,
            model_config: classification_config(&encoder.config_json, vocabulary),
            state: TrainerState::default(),
        };
        Ok((trainer, report))
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn model(&self) -> &BertClassifier {
        &self.model
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// Runs every epoch: shuffled mini-batches, one AdamW step per batch,
    /// then evaluation and (optionally) a checkpoint under `out_dir`.
    pub fn fit(
        &mut self,
        train: &PreparedDataset,
        eval: &PreparedDataset,
        out_dir: &Path,
    ) -> Result<Vec<EpochMetrics>, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::Config("training set is empty".into()));
        }
        let train_data = TensorDataset::from_prepared(train, &self.device)?;
        let eval_data = TensorDataset::from_prepared(eval, &self.device)?;

        let steps_per_epoch = train.len().div_ceil(self.config.batch_size);
        let max_steps = steps_per_epoch * self.config.num_epochs;
        self.state.max_steps = max_steps;
        info!(
            "Training on {} examples ({} eval), {} epochs, {} steps per epoch, {} total",
            train.len(),
            eval.len(),
            self.config.num_epochs,
            steps_per_epoch,
            max_steps
        );

        let (mut decay, mut no_decay) = self.optimizers()?;
        let mut history = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let mut batches =
                BatchIterator::shuffled(&train_data, self.config.batch_size, epoch_seed(self.config.seed, epoch));
            let (mut epoch_loss, mut epoch_steps) = (0.0f64, 0usize);
            let (mut window_loss, mut window_steps) = (0.0f64, 0usize);
            let mut lr = self.config.learning_rate;

            while let Some(batch) = batches.next_batch()? {
                lr = linear_decay(self.config.learning_rate, self.state.global_step, max_steps);
                decay.set_learning_rate(lr);
                no_decay.set_learning_rate(lr);

                let logits = self.model.forward_t(
                    &batch.input_ids,
                    &batch.attention_mask,
                    &batch.token_type_ids,
                    true,
                )?;
                let loss = bce_with_logits(&logits, &batch.labels)?;
                let grads = loss.backward()?;
                decay.step(&grads)?;
                no_decay.step(&grads)?;

                let loss = f64::from(loss.to_scalar::<f32>()?);
                self.state.global_step += 1;
                epoch_loss += loss;
                epoch_steps += 1;
                window_loss += loss;
                window_steps += 1;
                debug!("step {} loss {:.4}", self.state.global_step, loss);

                if self.state.global_step % self.config.logging_steps == 0 {
                    let entry = LogEntry {
                        step: self.state.global_step,
                        epoch: self.state.global_step as f64 / steps_per_epoch as f64,
                        loss: window_loss / window_steps as f64,
                        learning_rate: lr,
                    };
                    info!(
                        "step {}: loss {:.4}, learning_rate {:.3e}, epoch {:.2}",
                        entry.step, entry.loss, entry.learning_rate, entry.epoch
                    );
                    self.state.log_history.push(entry);
                    window_loss = 0.0;
                    window_steps = 0;
                }
            }

            let eval_metrics = self.evaluate(&eval_data)?;
            let metrics = EpochMetrics {
                epoch: epoch + 1,
                global_step: self.state.global_step,
                train_loss: epoch_loss / epoch_steps.max(1) as f64,
                eval_loss: eval_metrics.loss,
                eval_f1_macro: eval_metrics.f1_macro,
                learning_rate: lr,
            };
            info!(
                "epoch {}/{}: train_loss {:.4}, eval_loss {:.4}, eval_f1_macro {:.4}",
                metrics.epoch, self.config.num_epochs, metrics.train_loss, metrics.eval_loss, metrics.eval_f1_macro
            );
            self.state.epoch = epoch + 1;
            self.state.epochs.push(metrics.clone());
            history.push(metrics);

            if self.config.save_checkpoints {
                let dir = out_dir.join(format!("checkpoint-{}", self.state.global_step));
                self.save_checkpoint(&dir)?;
            }
        }

        Ok(history)
    }

    /// Mean BCE (weighted by batch size) and macro-F1 over `data`, without
    /// dropout.
    pub fn evaluate(&self, data: &TensorDataset) -> Result<EvalMetrics, TrainingError> {
        let mut batches = BatchIterator::sequential(data, self.config.eval_batch_size);
        let mut loss_sum = 0.0f64;
        let mut probabilities = Vec::new();
        let mut targets = Vec::new();
        let mut rows = 0usize;
        let mut width = 0usize;

        while let Some(batch) = batches.next_batch()? {
            let logits = self.model.forward_t(
                &batch.input_ids,
                &batch.attention_mask,
                &batch.token_type_ids,
                false,
            )?;
            let size = batch.size();
            let loss = bce_with_logits(&logits, &batch.labels)?.to_scalar::<f32>()?;
            loss_sum += f64::from(loss) * size as f64;

            let logits = logits.to_vec2::<f32>()?;
            width = logits.first().map(Vec::len).unwrap_or(width);
            probabilities.extend(logits.into_iter().flatten());
            targets.extend(batch.labels.to_vec2::<f32>()?.into_iter().flatten());
            rows += size;
        }

        if rows == 0 {
            return Ok(EvalMetrics {
                loss: 0.0,
                f1_macro: 0.0,
                num_examples: 0,
            });
        }
        let logits = Array2::from_shape_vec((rows, width), probabilities)
            .map_err(|e| TrainingError::Config(format!("evaluation logits: {}", e)))?;
        let targets = Array2::from_shape_vec((rows, width), targets)
            .map_err(|e| TrainingError::Config(format!("evaluation labels: {}", e)))?;
        let probabilities = sigmoid_rows(&logits);

        Ok(EvalMetrics {
            loss: loss_sum / rows as f64,
            f1_macro: macro_f1(&probabilities, &targets, self.config.threshold),
            num_examples: rows,
        })
    }

    /// Writes weights, model config, training config and trainer state to `dir`.
    pub fn save_checkpoint(&self, dir: &Path) -> Result<(), TrainingError> {
        fs::create_dir_all(dir)?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&self.model_config)?)?;
        fs::write(dir.join(TRAINING_CONFIG_FILE), serde_json::to_string_pretty(&self.config)?)?;
        self.write_state(dir)?;
        info!("Saved checkpoint to {:?}", dir);
        Ok(())
    }

    pub fn write_state(&self, dir: &Path) -> Result<(), TrainingError> {
        fs::write(dir.join(TRAINER_STATE_FILE), serde_json::to_string_pretty(&self.state)?)?;
        Ok(())
    }

    /// AdamW over two parameter groups: biases and LayerNorm parameters are
    /// exempt from weight decay.
    fn optimizers(&self) -> Result<(AdamW, AdamW), TrainingError> {
        let (decay, no_decay) = parameter_groups(&self.varmap)?;
        debug!("{} parameters with weight decay, {} without", decay.len(), no_decay.len());
        let params = |weight_decay: f64| ParamsAdamW {
            lr: self.config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
        };
        Ok((
            AdamW::new(decay, params(self.config.weight_decay))?,
            AdamW::new(no_decay, params(0.0))?,
        ))
    }
}

fn is_no_decay(name: &str) -> bool {
    name.ends_with(".bias") || name.contains("LayerNorm")
}

fn parameter_groups(varmap: &VarMap) -> Result<(Vec<Var>, Vec<Var>), TrainingError> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| TrainingError::Config("parameter map lock poisoned".into()))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();
    let (mut decay, mut no_decay) = (Vec::new(), Vec::new());
    for name in names {
        if is_no_decay(name) {
            no_decay.push(data[name].clone());
        } else {
            decay.push(data[name].clone());
        }
    }
    Ok((decay, no_decay))
}

/// Learning rate after `step` optimizer steps: linear from `base` down to 0
/// at `total`.
pub(crate) fn linear_decay(base: f64, step: usize, total: usize) -> f64 {
    if total == 0 {
        return base;
    }
    base * total.saturating_sub(step) as f64 / total as f64
}

/// Shuffle seed for a 0-based epoch. Wraps so any configured seed is valid.
pub(crate) fn epoch_seed(seed: u64, epoch: usize) -> u64 {
    seed.wrapping_add(epoch as u64)
}
