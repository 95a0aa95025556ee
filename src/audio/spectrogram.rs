//! Normalized magnitude spectrogram via STFT.
//!
//! Default configuration:
//! - Frame length: 200 samples, periodic Hann window
//! - Frame step: 80 samples
//! - FFT length: 256 (frames zero-padded; 129 one-sided bins)
//! - No end padding: a trailing partial frame is dropped
//! - Compression: `|X|^0.5`
//! - Per-utterance, per-bin normalization along time
//! - Zero-padded or truncated to 2754 frames (≈10 s at 22.05 kHz)

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::Result;
use crate::config::SpectrogramConfig;

/// Row-major `[num_frames, num_bins]` feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    data: Vec<f32>,
    num_frames: usize,
    num_bins: usize,
}

impl Spectrogram {
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Frame `t` as a slice of `num_bins` values, `None` past the last frame.
    pub fn frame(&self, t: usize) -> Option<&[f32]> {
        if t >= self.num_frames {
            return None;
        }
        self.data.get(t * self.num_bins..(t + 1) * self.num_bins)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy into a `[num_frames, num_bins]` tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.data,
            (self.num_frames, self.num_bins),
            device,
        )?)
    }
}

/// Spectrogram processor.
///
/// Pre-computes the window and FFT plan on construction, then call
/// [`SpectrogramExtractor::extract`] per utterance.
pub struct SpectrogramExtractor {
    config: SpectrogramConfig,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl SpectrogramExtractor {
    /// Fails with [`Error::Config`](crate::Error::Config) when `config` does
    /// not validate.
    pub fn new(config: SpectrogramConfig) -> Result<Self> {
        config.validate()?;
        let window = hann_window(config.frame_length);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_length);
        Ok(Self {
            config,
            window,
            fft,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Waveform → `[pad_len, fft_length / 2 + 1]` normalized spectrogram.
    pub fn extract(&self, samples: &[f32]) -> Spectrogram {
        let num_bins = self.config.num_bins();
        let mut frames = self.stft_magnitude(samples);

        let power = self.config.power;
        for frame in frames.iter_mut() {
            for v in frame.iter_mut() {
                *v = v.powf(power);
            }
        }

        normalize_bins(&mut frames, num_bins, self.config.norm_epsilon);

        let pad_len = self.config.pad_len;
        let mut data = vec![0.0f32; pad_len * num_bins];
        for (t, frame) in frames.iter().take(pad_len).enumerate() {
            data[t * num_bins..(t + 1) * num_bins].copy_from_slice(frame);
        }

        Spectrogram {
            data,
            num_frames: pad_len,
            num_bins,
        }
    }

    /// Number of full frames the STFT yields for `num_samples` samples.
    pub fn frame_count(&self, num_samples: usize) -> usize {
        let frame_length = self.config.frame_length;
        if num_samples < frame_length {
            0
        } else {
            (num_samples - frame_length) / self.config.frame_step + 1
        }
    }

    /// One-sided magnitude spectrum per frame.
    fn stft_magnitude(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let frame_length = self.config.frame_length;
        let fft_length = self.config.fft_length;
        let num_bins = self.config.num_bins();
        let num_frames = self.frame_count(samples.len());

        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_length];
        for frame_idx in 0..num_frames {
            let start = frame_idx * self.config.frame_step;
            let chunk = &samples[start..start + frame_length];

            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = if i < frame_length {
                    Complex::new(chunk[i] * self.window[i], 0.0)
                } else {
                    Complex::new(0.0, 0.0)
                };
            }
            self.fft.process(&mut buffer);

            frames.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
        }
        frames
    }
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            (0.5 * (1.0 - phase.cos())) as f32
        })
        .collect()
}

/// Zero-mean, unit-variance per frequency bin, statistics taken over time.
///
/// Population standard deviation; `epsilon` keeps constant bins finite.
fn normalize_bins(frames: &mut [Vec<f32>], num_bins: usize, epsilon: f32) {
    if frames.is_empty() {
        return;
    }
    let n = frames.len() as f64;
    for bin in 0..num_bins {
        let mean = frames.iter().map(|f| f[bin] as f64).sum::<f64>() / n;
        let var = frames
            .iter()
            .map(|f| {
                let d = f[bin] as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let denom = var.sqrt() + epsilon as f64;
        for frame in frames.iter_mut() {
            frame[bin] = ((frame[bin] as f64 - mean) / denom) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(pad_len: usize) -> SpectrogramConfig {
        SpectrogramConfig {
            pad_len,
            ..SpectrogramConfig::default()
        }
    }

    fn sine(num_samples: usize, freq: f64) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / 22050.0).sin() as f32)
            .collect()
    }

    #[test]
    fn hann_window_properties() {
        let w = hann_window(200);
        assert_eq!(w.len(), 200);
        assert!(w[0].abs() < 1e-7);
        assert!((w[100] - 1.0).abs() < 1e-6);
        // Periodic: symmetric around N/2
        assert!((w[30] - w[170]).abs() < 1e-6);
    }

    #[test]
    fn frame_count_matches_stft() {
        let ex = SpectrogramExtractor::new(SpectrogramConfig::default()).unwrap();
        assert_eq!(ex.frame_count(199), 0);
        assert_eq!(ex.frame_count(200), 1);
        assert_eq!(ex.frame_count(279), 1);
        assert_eq!(ex.frame_count(280), 2);
    }

    #[test]
    fn short_waveform_is_zero_padded() {
        let ex = SpectrogramExtractor::new(small_config(50)).unwrap();
        let spec = ex.extract(&sine(1000, 440.0));
        assert_eq!(spec.num_frames(), 50);
        assert_eq!(spec.num_bins(), 129);
        // 1000 samples → 11 frames; everything after is padding.
        assert!(spec.frame(11).unwrap().iter().all(|&v| v == 0.0));
        assert!(spec.frame(49).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn long_waveform_is_truncated() {
        let ex = SpectrogramExtractor::new(small_config(20)).unwrap();
        let spec = ex.extract(&sine(22050, 440.0));
        assert_eq!(spec.num_frames(), 20);
        assert_eq!(spec.as_slice().len(), 20 * 129);
        assert_eq!(spec.frame(19).map(<[f32]>::len), Some(129));
        assert!(spec.frame(20).is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let zero_step = SpectrogramConfig {
            frame_step: 0,
            ..SpectrogramConfig::default()
        };
        assert!(matches!(
            SpectrogramExtractor::new(zero_step),
            Err(crate::Error::Config(_))
        ));
        let short_fft = SpectrogramConfig {
            fft_length: 128,
            ..SpectrogramConfig::default()
        };
        assert!(SpectrogramExtractor::new(short_fft).is_err());
    }

    #[test]
    fn waveform_shorter_than_a_frame() {
        let ex = SpectrogramExtractor::new(small_config(8)).unwrap();
        let spec = ex.extract(&[0.1; 50]);
        assert_eq!(spec.num_frames(), 8);
        assert!(spec.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn bins_are_normalized_over_time() {
        let samples: Vec<f32> = sine(4000, 440.0)
            .iter()
            .zip(sine(4000, 3000.0))
            .enumerate()
            .map(|(i, (a, b))| a * (i as f32 / 4000.0) + 0.3 * b)
            .collect();
        let ex = SpectrogramExtractor::new(small_config(200)).unwrap();
        let frames = ex.frame_count(samples.len());
        let spec = ex.extract(&samples);

        for bin in [4, 5, 6] {
            let values: Vec<f32> = (0..frames).map(|t| spec.frame(t).unwrap()[bin]).collect();
            let mean = values.iter().sum::<f32>() / frames as f32;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / frames as f32;
            assert!(mean.abs() < 1e-4, "bin {bin} mean {mean}");
            assert!((var - 1.0).abs() < 1e-2, "bin {bin} var {var}");
        }
    }

    #[test]
    fn silence_stays_finite() {
        let ex = SpectrogramExtractor::new(small_config(40)).unwrap();
        let spec = ex.extract(&vec![0.0; 3000]);
        assert!(spec.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn to_tensor_shape() {
        let ex = SpectrogramExtractor::new(small_config(16)).unwrap();
        let spec = ex.extract(&sine(2000, 440.0));
        let t = spec.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[16, 129]);
    }
}
