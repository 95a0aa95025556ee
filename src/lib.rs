//! Character-level speech recognition with a sequence-to-sequence
//! Transformer, in pure Rust on candle.
//!
//! ## Architecture
//!
//! Audio is turned into a normalized magnitude spectrogram, downsampled by
//! three strided convolutions and encoded; a causal decoder then predicts the
//! transcript one character at a time:
//!
//! ```text
//! waveform → STFT magnitude^0.5 → per-bin normalize → pad to 2754 frames
//!                                                        ↓
//!                               3 × Conv1d(k=11, s=2) + ReLU  (2754 → 345)
//!                                                        ↓
//!                                         4 × encoder layer ──────┐
//!                                                                 ↓
//! "<text>" → char tokens → token + position embedding → decoder layer
//!                                                                 ↓
//!                                                  Linear → 34 classes
//! ```
//!
//! ## Modules
//!
//! - [`audio`] — WAV I/O and spectrogram features
//! - [`text`] — 34-symbol character vectorizer
//! - [`model`] — embeddings, attention, encoder/decoder layers, loss
//! - [`schedule`] — warm-up/decay learning-rate schedule
//! - [`train`] — teacher-forced training and evaluation steps
//! - [`data`] — LJSpeech metadata, example discovery, batching
//! - [`display`] — periodic greedy-decoding samples
//! - [`config`] — JSON-backed configuration

pub mod audio;
pub mod config;
pub mod data;
pub mod display;
pub mod model;
pub mod schedule;
pub mod text;
pub mod train;

mod error;

pub use error::{Error, Result};
