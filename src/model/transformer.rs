//! Encoder-decoder speech Transformer.
//!
//! ```text
//! spectrogram [B, T, 129]
//!   → SpeechFeatureEmbedding          [B, T/8, hid]
//!   → N × TransformerEncoderLayer     [B, T/8, hid]  ─────────┐
//!                                                             │
//! tokens [B, L] → TokenEmbedding      [B, L, hid]             │
//!   → M × TransformerDecoderLayer(enc_out) ◄──────────────────┘
//!   → Linear(hid, num_classes)        [B, L, num_classes]
//! ```
//!
//! Training uses teacher forcing: the decoder sees `target[:, :-1]` and is
//! scored against `target[:, 1:]`. Inference decodes greedily, one token per
//! full decoder pass.

use candle_core::{D, DType, IndexOp, Module, Tensor};
use candle_nn::VarBuilder;

use super::embedding::{SpeechFeatureEmbedding, TokenEmbedding};
use super::layers::{TransformerDecoderLayer, TransformerEncoderLayer};
use super::loss::masked_cross_entropy;
use crate::config::TransformerConfig;
use crate::{Error, Result};

/// Complete speech-to-text Transformer.
#[derive(Debug, Clone)]
pub struct SpeechTransformer {
    config: TransformerConfig,
    enc_input: SpeechFeatureEmbedding,
    encoder: Vec<TransformerEncoderLayer>,
    dec_input: TokenEmbedding,
    decoder: Vec<TransformerDecoderLayer>,
    classifier: candle_nn::Linear,
}

impl SpeechTransformer {
    /// Build the model, creating (or loading) its parameters through `vb`.
    pub fn new(config: &TransformerConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let enc_input = SpeechFeatureEmbedding::new(
            vb.pp("enc_input"),
            config.num_freq_bins,
            config.num_hid,
        )?;
        let mut encoder = Vec::with_capacity(config.num_layers_enc);
        for i in 0..config.num_layers_enc {
            encoder.push(TransformerEncoderLayer::new(
                config,
                vb.pp(format!("encoder.{i}")),
            )?);
        }

        let dec_input = TokenEmbedding::new(
            vb.pp("dec_input"),
            config.num_classes,
            config.target_maxlen,
            config.num_hid,
        )?;
        let mut decoder = Vec::with_capacity(config.num_layers_dec);
        for i in 0..config.num_layers_dec {
            decoder.push(TransformerDecoderLayer::new(
                config,
                vb.pp(format!("decoder.{i}")),
            )?);
        }

        let classifier =
            candle_nn::linear(config.num_hid, config.num_classes, vb.pp("classifier"))?;

        tracing::debug!(
            num_hid = config.num_hid,
            num_layers_enc = config.num_layers_enc,
            num_layers_dec = config.num_layers_dec,
            "built speech transformer"
        );

        Ok(Self {
            config: config.clone(),
            enc_input,
            encoder,
            dec_input,
            decoder,
            classifier,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Run the audio embedding and encoder stack.
    ///
    /// `source`: `[B, source_maxlen, num_freq_bins]` → `[B, S, num_hid]`.
    pub fn encode(&self, source: &Tensor, train: bool) -> Result<Tensor> {
        self.check_source(source)?;
        let mut h = self.enc_input.forward(source)?;
        for layer in &self.encoder {
            h = layer.forward(&h, train)?;
        }
        Ok(h)
    }

    /// Run the token embedding and decoder stack against encoder output.
    ///
    /// `target`: `[B, L]` u32 with `L <= target_maxlen` → `[B, L, num_hid]`.
    pub fn decode(&self, enc_out: &Tensor, target: &Tensor, train: bool) -> Result<Tensor> {
        let (enc_batch, _, _) = enc_out.dims3()?;
        let (batch, _) = target.dims2()?;
        if batch != enc_batch {
            return Err(Error::Shape(format!(
                "decoder batch {batch} differs from encoder batch {enc_batch}"
            )));
        }
        let mut y = self.dec_input.forward(target)?;
        for layer in &self.decoder {
            y = layer.forward(enc_out, &y, train)?;
        }
        Ok(y)
    }

    /// Per-position class logits `[B, L, num_classes]`.
    pub fn forward(&self, source: &Tensor, target: &Tensor, train: bool) -> Result<Tensor> {
        let enc_out = self.encode(source, train)?;
        let y = self.decode(&enc_out, target, train)?;
        Ok(self.classifier.forward(&y)?)
    }

    /// Label-smoothed cross-entropy of `logits` against `target`, ignoring
    /// padding positions (index 0).
    pub fn loss(&self, logits: &Tensor, target: &Tensor, label_smoothing: f64) -> Result<Tensor> {
        masked_cross_entropy(logits, target, crate::text::PAD_INDEX, label_smoothing)
    }

    /// Greedy autoregressive decoding.
    ///
    /// Starts every batch element at `start_token` and appends the arg-max of
    /// the last position for exactly `target_maxlen - 1` steps. The loop does
    /// not stop on an end token; callers truncate the result themselves.
    ///
    /// Returns `[B, target_maxlen]` u32.
    pub fn generate(&self, source: &Tensor, start_token: u32) -> Result<Tensor> {
        let enc_out = self.encode(source, false)?;
        let batch = enc_out.dim(0)?;
        let mut dec_input = start_tokens(batch, start_token, source)?;
        for _ in 0..self.config.target_maxlen - 1 {
            let next = self.next_token(&enc_out, &dec_input)?;
            dec_input = Tensor::cat(&[&dec_input, &next], 1)?;
        }
        Ok(dec_input)
    }

    /// Greedy decoding that stops once every batch element has produced
    /// `end_token`.
    ///
    /// Positions after a sequence's end token are filled with `pad_token`, so
    /// the output is still `[B, target_maxlen]`.
    pub fn generate_with_early_stop(
        &self,
        source: &Tensor,
        start_token: u32,
        end_token: u32,
        pad_token: u32,
    ) -> Result<Tensor> {
        let enc_out = self.encode(source, false)?;
        let batch = enc_out.dim(0)?;
        let max_len = self.config.target_maxlen;
        let mut dec_input = start_tokens(batch, start_token, source)?;
        let mut finished = vec![false; batch];

        while dec_input.dim(1)? < max_len && !finished.iter().all(|&f| f) {
            let next = self.next_token(&enc_out, &dec_input)?;
            let mut values = next.flatten_all()?.to_vec1::<u32>()?;
            for (value, done) in values.iter_mut().zip(finished.iter_mut()) {
                if *done {
                    *value = pad_token;
                } else if *value == end_token {
                    *done = true;
                }
            }
            let next = Tensor::from_vec(values, (batch, 1), source.device())?;
            dec_input = Tensor::cat(&[&dec_input, &next], 1)?;
        }

        let remaining = max_len - dec_input.dim(1)?;
        if remaining > 0 {
            let pad = Tensor::full(pad_token, (batch, remaining), source.device())?;
            dec_input = Tensor::cat(&[&dec_input, &pad], 1)?;
        }
        Ok(dec_input)
    }

    /// Arg-max class at the last decoder position, `[B, 1]` u32.
    fn next_token(&self, enc_out: &Tensor, dec_input: &Tensor) -> Result<Tensor> {
        let dec_out = self.decode(enc_out, dec_input, false)?;
        let len = dec_out.dim(1)?;
        let last = dec_out.i((.., len - 1, ..))?; // [B, hid]
        let logits = self.classifier.forward(&last)?; // [B, C]
        Ok(logits.argmax_keepdim(D::Minus1)?.to_dtype(DType::U32)?)
    }

    fn check_source(&self, source: &Tensor) -> Result<()> {
        let (_, frames, bins) = source.dims3().map_err(|_| {
            Error::Shape(format!(
                "source must be [batch, frames, bins], got {:?}",
                source.dims()
            ))
        })?;
        if frames != self.config.source_maxlen || bins != self.config.num_freq_bins {
            return Err(Error::Shape(format!(
                "source frames/bins {frames}x{bins}, expected {}x{}",
                self.config.source_maxlen, self.config.num_freq_bins
            )));
        }
        Ok(())
    }
}

fn start_tokens(batch: usize, start_token: u32, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::full(start_token, (batch, 1), like.device())?)
}
