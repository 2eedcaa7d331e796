//! Signal helpers shared by the spectrogram front-end.

pub mod stft;

pub use stft::{stft, StftParams};

/// Reflect padding without repeating the edge sample.
///
/// Inputs too short to reflect are first zero-extended (right side first) so
/// that the reflected part fits; the total padding stays `left + right`.
pub fn pad_reflect(samples: &[f32], left: usize, right: usize) -> Vec<f32> {
    let n = samples.len();
    if n == 0 {
        return vec![0.0; left + right];
    }
    let max_pad = left.max(right);
    if n <= max_pad {
        let extra = max_pad - n + 1;
        let extra_right = right.min(extra);
        let extra_left = (extra - extra_right).min(left);
        let mut extended = vec![0.0; extra_left];
        extended.extend_from_slice(samples);
        extended.resize(extra_left + n + extra_right, 0.0);
        return pad_reflect(&extended, left - extra_left, right - extra_right);
    }

    let mut padded = Vec::with_capacity(left + n + right);
    padded.extend((1..=left).rev().map(|i| samples[i]));
    padded.extend_from_slice(samples);
    padded.extend((1..=right).map(|i| samples[n - 1 - i]));
    padded
}

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    let factor = 2.0 * std::f64::consts::PI / size as f64;
    (0..size)
        .map(|i| (0.5 - 0.5 * (i as f64 * factor).cos()) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_reflect_excludes_edge() {
        let padded = pad_reflect(&[1.0, 2.0, 3.0, 4.0], 2, 3);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_pad_reflect_short_input() {
        let padded = pad_reflect(&[1.0, 2.0], 3, 3);
        assert_eq!(padded.len(), 8);
        assert_eq!(&padded[3..5], &[1.0, 2.0]);
    }

    #[test]
    fn test_hann_window_is_periodic() {
        let w = hann_window(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[1] - w[7]).abs() < 1e-6);
    }
}
