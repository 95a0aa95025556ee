//! Audio front end.
//!
//! WAV decoding to mono `f32` samples and the normalized STFT spectrogram
//! consumed by the speech embedding.

mod spectrogram;
mod wav;

pub use spectrogram::{Spectrogram, SpectrogramExtractor};
pub use wav::{downmix_to_mono, read_wav, read_wav_mono, write_wav};
