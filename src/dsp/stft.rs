use super::{hann_window, pad_reflect};
use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StftParams {
    pub n_fft: usize,
    pub hop_length: usize,
    /// Scale by `1 / sqrt(n_fft)`.
    pub normalized: bool,
    /// Reflect-pad `n_fft / 2` samples on both sides before framing.
    pub center: bool,
}

/// Short-time Fourier transform of one channel, shaped `[n_fft / 2 + 1, frames]`.
pub fn stft(samples: &[f32], params: &StftParams) -> Array2<Complex32> {
    let n_fft = params.n_fft;
    let bins = n_fft / 2 + 1;

    let padded;
    let signal: &[f32] = if params.center {
        padded = pad_reflect(samples, n_fft / 2, n_fft / 2);
        &padded
    } else {
        samples
    };

    if signal.len() < n_fft || params.hop_length == 0 {
        return Array2::from_elem((bins, 0), Complex32::new(0.0, 0.0));
    }
    let frames = 1 + (signal.len() - n_fft) / params.hop_length;

    let window = hann_window(n_fft);
    let scale = if params.normalized {
        1.0 / (n_fft as f32).sqrt()
    } else {
        1.0
    };

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buffer = vec![Complex32::new(0.0, 0.0); n_fft];
    let mut out = Array2::from_elem((bins, frames), Complex32::new(0.0, 0.0));

    for frame in 0..frames {
        let start = frame * params.hop_length;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex32::new(signal[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for bin in 0..bins {
            out[[bin, frame]] = buffer[bin] * scale;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_frame_count() {
        let params = StftParams {
            n_fft: 256,
            hop_length: 64,
            normalized: true,
            center: true,
        };
        let spec = stft(&vec![0.0; 1000], &params);
        assert_eq!(spec.shape(), &[129, 1 + 1000 / 64]);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let n_fft = 256;
        let params = StftParams {
            n_fft,
            hop_length: 64,
            normalized: false,
            center: false,
        };
        let bin = 16;
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n_fft as f32).sin())
            .collect();
        let spec = stft(&samples, &params);

        let column = spec.column(3);
        let peak = column
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
    }
}
