//! Model components.
//!
//! ## Components
//!
//! - [`embedding`] — token/position embedding (text) and strided-conv embedding (audio)
//! - [`attention`] — multi-head scaled dot-product attention
//! - [`mask`] — causal visibility masks and their additive biases
//! - [`layers`] — encoder and decoder blocks, layer norm, feed-forward
//! - [`loss`] — label-smoothed, padding-masked cross-entropy
//! - [`transformer`] — the full encoder-decoder with greedy generation

pub mod attention;
pub mod embedding;
pub mod layers;
pub mod loss;
pub mod mask;
pub mod transformer;

pub use transformer::SpeechTransformer;
