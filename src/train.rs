//! Teacher-forced training and evaluation.
//!
//! [`Trainer`] owns the parameters ([`VarMap`]), the model built over them,
//! an Adam optimizer and the learning-rate schedule. Each
//! [`train_step`](Trainer::train_step) sets the optimizer rate from the
//! schedule at the current step, applies one update, then advances the step.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};

use crate::config::AsrConfig;
use crate::data::Batch;
use crate::model::SpeechTransformer;
use crate::schedule::{CustomSchedule, LearningRateSchedule};
use crate::{Error, Result};

/// Running mean of per-batch losses.
#[derive(Debug, Clone, Default)]
pub struct LossMeter {
    sum: f64,
    count: u64,
}

impl LossMeter {
    pub fn update(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    /// Mean so far, 0 before the first update.
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Owns the model, its parameters and the optimizer state.
pub struct Trainer {
    varmap: VarMap,
    model: SpeechTransformer,
    optimizer: AdamW,
    schedule: CustomSchedule,
    step: u64,
    label_smoothing: f64,
    train_loss: LossMeter,
    val_loss: LossMeter,
}

impl Trainer {
    /// Initialise fresh parameters on `device`.
    pub fn new(config: &AsrConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = SpeechTransformer::new(&config.model, vb)?;

        let schedule = CustomSchedule::new(config.schedule.clone());
        let training = &config.training;
        let params = ParamsAdamW {
            lr: schedule.rate(0),
            beta1: training.beta1,
            beta2: training.beta2,
            eps: training.adam_eps,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;

        tracing::info!(
            parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            steps_per_epoch = config.schedule.steps_per_epoch,
            "trainer ready"
        );

        Ok(Self {
            varmap,
            model,
            optimizer,
            schedule,
            step: 0,
            label_smoothing: training.label_smoothing,
            train_loss: LossMeter::default(),
            val_loss: LossMeter::default(),
        })
    }

    pub fn model(&self) -> &SpeechTransformer {
        &self.model
    }

    /// Number of optimizer updates applied so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Rate the optimizer used for its most recent update.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn train_loss(&self) -> &LossMeter {
        &self.train_loss
    }

    pub fn val_loss(&self) -> &LossMeter {
        &self.val_loss
    }

    /// One optimizer update on `batch`. Returns the running training loss.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        let loss = self.batch_loss(batch, true)?;
        self.optimizer.set_learning_rate(self.schedule.rate(self.step));
        self.optimizer.backward_step(&loss)?;
        self.step += 1;

        let value: f32 = loss.to_scalar()?;
        if !value.is_finite() {
            tracing::warn!(step = self.step, loss = value, "non-finite training loss");
        }
        self.train_loss.update(value);
        Ok(self.train_loss.mean())
    }

    /// Score `batch` without dropout or parameter updates. Returns the
    /// running validation loss.
    pub fn eval_step(&mut self, batch: &Batch) -> Result<f32> {
        let loss = self.batch_loss(batch, false)?;
        let value: f32 = loss.to_scalar()?;
        self.val_loss.update(value);
        Ok(self.val_loss.mean())
    }

    /// Clear both loss meters; call at the start of each epoch.
    pub fn reset_metrics(&mut self) {
        self.train_loss.reset();
        self.val_loss.reset();
    }

    /// Write all parameters as safetensors.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// Overwrite the current parameters from a safetensors checkpoint.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }

    /// Decoder sees `target[:, :-1]` and is scored on `target[:, 1:]`.
    fn batch_loss(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let (_, len) = batch.target.dims2()?;
        if len < 2 {
            return Err(Error::Shape(format!(
                "target length {len} leaves nothing to predict"
            )));
        }
        let dec_input = batch.target.narrow(1, 0, len - 1)?;
        let dec_target = batch.target.narrow(1, 1, len - 1)?;
        let logits = self.model.forward(&batch.source, &dec_input, train)?;
        self.model.loss(&logits, &dec_target, self.label_smoothing)
    }
}
