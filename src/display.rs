//! Periodic qualitative check of the model's transcriptions.

use crate::Result;
use crate::data::Batch;
use crate::model::SpeechTransformer;
use crate::text::{END_INDEX, START_INDEX, Vectorizer};

/// Greedy-decodes one batch every `display_every` epochs and logs each
/// target next to its prediction.
#[derive(Debug, Clone)]
pub struct DisplayOutputs {
    vectorizer: Vectorizer,
    start_token: u32,
    end_token: u32,
    display_every: usize,
}

impl DisplayOutputs {
    pub fn new(vectorizer: Vectorizer, display_every: usize) -> Self {
        Self {
            vectorizer,
            start_token: START_INDEX,
            end_token: END_INDEX,
            display_every: display_every.max(1),
        }
    }

    /// Whether `epoch` is a display epoch.
    pub fn is_due(&self, epoch: usize) -> bool {
        epoch % self.display_every == 0
    }

    /// Render indices as characters, stopping after the first end token.
    pub fn render(&self, indices: &[u32]) -> String {
        let mut out = String::new();
        for &idx in indices {
            out.push(self.vectorizer.symbol(idx));
            if idx == self.end_token {
                break;
            }
        }
        out
    }

    /// Ground-truth rendering: padding characters dropped.
    pub fn render_target(&self, indices: &[u32]) -> String {
        self.vectorizer.decode(indices)
    }

    /// At display epochs, decode `batch` and log `(target, prediction)`
    /// pairs. Other epochs return an empty list without running the model.
    pub fn on_epoch_end(
        &self,
        epoch: usize,
        model: &SpeechTransformer,
        batch: &Batch,
    ) -> Result<Vec<(String, String)>> {
        if !self.is_due(epoch) {
            return Ok(Vec::new());
        }
        let preds = model.generate(&batch.source, self.start_token)?.to_vec2::<u32>()?;
        let targets = batch.target.to_vec2::<u32>()?;

        let mut pairs = Vec::with_capacity(preds.len());
        for (target, pred) in targets.iter().zip(&preds) {
            let target = self.render_target(target);
            let prediction = self.render(pred);
            tracing::info!(epoch, target = %target, prediction = %prediction, "sample");
            pairs.push((target, prediction));
        }
        Ok(pairs)
    }
}
