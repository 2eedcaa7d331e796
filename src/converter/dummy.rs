//! Representative inputs for tracing.

use crate::config::DummyInput;
use crate::model::HTDemucs;
use ndarray::{s, Array3, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DummyError {
    #[error("Waveform has {actual} samples, more than the reference length {expected}")]
    TooLong { actual: usize, expected: usize },
}

/// Waveform `[1, channels, time]` and the spectrogram derived from it.
#[derive(Debug, Clone)]
pub struct DummyInputs {
    pub waveform: Array3<f32>,
    pub spectrogram: Array4<f32>,
}

/// Standard normal noise shaped `[1, channels, length]`.
pub fn synthesize_waveform(channels: usize, length: usize, source: DummyInput) -> Array3<f32> {
    let mut rng = match source {
        DummyInput::Seeded(seed) => StdRng::seed_from_u64(seed),
        DummyInput::Random => StdRng::from_entropy(),
    };
    Array3::from_shape_simple_fn((1, channels, length), || rng.sample(StandardNormal))
}

/// Zero-pads the trailing edge of the time axis up to exactly `length`.
pub fn pad_to_length(waveform: Array3<f32>, length: usize) -> Result<Array3<f32>, DummyError> {
    let (batch, channels, actual) = waveform.dim();
    if actual > length {
        return Err(DummyError::TooLong {
            actual,
            expected: length,
        });
    }
    if actual == length {
        return Ok(waveform);
    }
    let mut padded = Array3::zeros((batch, channels, length));
    padded.slice_mut(s![.., .., ..actual]).assign(&waveform);
    Ok(padded)
}

/// Builds the input pair for `model` at its reference length. The
/// spectrogram goes through the network's own transform applied to the very
/// same waveform.
pub fn dummy_inputs(model: &HTDemucs, length: usize, source: DummyInput) -> Result<DummyInputs, DummyError> {
    let waveform = synthesize_waveform(model.config().audio_channels, length, source);
    let waveform = pad_to_length(waveform, length)?;
    let spectrogram = model.magnitude(&model.spec(&waveform));
    Ok(DummyInputs { waveform, spectrogram })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HTDemucsConfig;

    #[test]
    fn test_seeded_waveform_is_reproducible() {
        let a = synthesize_waveform(2, 100, DummyInput::Seeded(3));
        let b = synthesize_waveform(2, 100, DummyInput::Seeded(3));
        assert_eq!(a.dim(), (1, 2, 100));
        assert_eq!(a, b);
        assert_ne!(a, synthesize_waveform(2, 100, DummyInput::Seeded(4)));
    }

    #[test]
    fn test_pad_to_length_fills_trailing_edge_only() {
        let short = Array3::from_elem((1, 2, 3), 1.0f32);
        let padded = pad_to_length(short, 5).unwrap();
        assert_eq!(padded.dim(), (1, 2, 5));
        for c in 0..2 {
            assert_eq!(padded.slice(s![0, c, ..]).to_vec(), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_pad_to_length_never_truncates() {
        let long = Array3::<f32>::zeros((1, 2, 10));
        assert_eq!(
            pad_to_length(long, 8),
            Err(DummyError::TooLong {
                actual: 10,
                expected: 8
            })
        );
    }

    #[test]
    fn test_dummy_shapes_follow_configuration() {
        let configs = [
            HTDemucsConfig {
                channels: 2,
                depth: 1,
                nfft: 64,
                segment: 1.0,
                samplerate: 1000,
                ..HTDemucsConfig::default()
            },
            HTDemucsConfig {
                channels: 2,
                depth: 1,
                nfft: 128,
                segment: 0.5,
                samplerate: 3000,
                ..HTDemucsConfig::default()
            },
        ];
        for config in configs {
            let model = HTDemucs::with_seed(config.clone(), 0).unwrap();
            let length = config.training_length().unwrap();
            let inputs = dummy_inputs(&model, length, DummyInput::Seeded(0)).unwrap();

            assert_eq!(inputs.waveform.dim(), (1, 2, length));
            let (batch, channels, bins, frames) = inputs.spectrogram.dim();
            assert_eq!(batch, 1);
            assert_eq!(channels, 2 * config.audio_channels);
            assert_eq!(bins, config.nfft / 2);
            assert_eq!(frames, length.div_ceil(config.nfft / 4));
        }
    }
}
