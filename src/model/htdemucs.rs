//! Hybrid time/frequency U-Net (HTDemucs).
//!
//! Two parallel encoder/decoder stacks: one over the raw waveform, one over
//! the complex spectrogram folded into channels. The forward pass is written
//! against [`Tracer`] so that exporting records it as a graph. Everything
//! that depends on the clip length (padding the waveform branch to a stride
//! multiple, cropping decoder outputs, the final reshapes) goes through shape
//! operators, never through sizes read from the dummy input.

use super::params::{Init, ParamSpec, ParamStore};
use super::ModelError;
use crate::dsp::{pad_reflect, stft, StftParams};
use crate::trace::{TraceError, Tracer, Value};
use ndarray::{s, Array3, Array4};
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCES: [&str; 4] = ["drums", "bass", "other", "vocals"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HTDemucsConfig {
    /// Stem names in output order.
    pub sources: Vec<String>,
    pub audio_channels: usize,
    /// Channels of the first encoder layer.
    pub channels: usize,
    pub growth: usize,
    pub nfft: usize,
    /// Complex-as-channels spectrogram input.
    pub cac: bool,
    pub depth: usize,
    pub kernel_size: usize,
    pub stride: usize,
    /// Weight of the frequency embedding added after the first frequency
    /// encoder; 0 disables it.
    pub freq_emb: f32,
    pub emb_scale: f32,
    pub dropout: f32,
    /// Training segment in seconds.
    pub segment: f64,
    pub samplerate: u32,
    pub norm_eps: f32,
}

impl Default for HTDemucsConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
            audio_channels: 2,
            channels: 48,
            growth: 2,
            nfft: 4096,
            cac: true,
            depth: 4,
            kernel_size: 8,
            stride: 4,
            freq_emb: 0.2,
            emb_scale: 10.0,
            dropout: 0.0,
            segment: 7.8,
            samplerate: 44100,
            norm_eps: 1e-5,
        }
    }
}

impl HTDemucsConfig {
    pub fn hop_length(&self) -> usize {
        self.nfft / 4
    }

    pub fn freq_bins(&self) -> usize {
        self.nfft / 2
    }

    pub fn spectrogram_channels(&self) -> usize {
        if self.cac {
            self.audio_channels * 2
        } else {
            self.audio_channels
        }
    }

    pub fn layer_channels(&self, idx: usize) -> usize {
        self.channels * self.growth.pow(idx as u32)
    }

    /// Spectrogram frames for a clip of `length` samples.
    pub fn frames(&self, length: usize) -> usize {
        length.div_ceil(self.hop_length())
    }

    /// Number of samples in one training segment.
    pub fn training_length(&self) -> Result<usize, ModelError> {
        let exact = self.segment * self.samplerate as f64;
        let rounded = exact.round();
        if !exact.is_finite() || rounded < 1.0 || (exact - rounded).abs() > 1e-3 {
            return Err(ModelError::InvalidConfig(format!(
                "segment of {}s at {} Hz is not a whole number of samples",
                self.segment, self.samplerate
            )));
        }
        Ok(rounded as usize)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidConfig(msg));
        if self.sources.is_empty() {
            return invalid("at least one source is required".to_string());
        }
        if self.audio_channels == 0 || self.channels == 0 || self.growth == 0 || self.depth == 0 {
            return invalid("channels, growth and depth must be positive".to_string());
        }
        if self.nfft < 16 || self.nfft % 8 != 0 {
            return invalid(format!("nfft {} must be a multiple of 8", self.nfft));
        }
        if self.stride < 2 || self.kernel_size != 2 * self.stride || self.kernel_size % 4 != 0 {
            return invalid(format!(
                "kernel size {} must be twice the stride {} and a multiple of 4",
                self.kernel_size, self.stride
            ));
        }
        let reduction = self.stride.pow(self.depth as u32);
        if self.freq_bins() % reduction != 0 {
            return invalid(format!(
                "{} frequency bins cannot be reduced by {} over {} layers",
                self.freq_bins(),
                self.stride,
                self.depth
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout {} must be in [0, 1)", self.dropout));
        }
        self.training_length()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HTDemucs {
    config: HTDemucsConfig,
    params: ParamStore,
    training: bool,
    dropout_draws: u64,
}

impl HTDemucs {
    /// Builds the network from a checkpoint. Like a freshly constructed
    /// module, it starts in training mode.
    pub fn new(config: HTDemucsConfig, params: ParamStore) -> Result<Self, ModelError> {
        config.validate()?;
        params.check_layout(&Self::parameter_layout(&config))?;
        Ok(Self {
            config,
            params,
            training: true,
            dropout_draws: 0,
        })
    }

    pub fn with_seed(config: HTDemucsConfig, seed: u64) -> Result<Self, ModelError> {
        config.validate()?;
        let params = ParamStore::seeded(&Self::parameter_layout(&config), seed);
        Self::new(config, params)
    }

    pub fn parameter_layout(config: &HTDemucsConfig) -> Vec<ParamSpec> {
        fn conv(layout: &mut Vec<ParamSpec>, prefix: &str, shape: Vec<usize>, transposed: bool) {
            let fan_in = shape[1..].iter().product();
            let bias = if transposed { shape[1] } else { shape[0] };
            layout.push(ParamSpec {
                name: format!("{}.weight", prefix),
                shape,
                init: Init::FanIn { fan_in },
            });
            layout.push(ParamSpec {
                name: format!("{}.bias", prefix),
                shape: vec![bias],
                init: Init::FanIn { fan_in },
            });
        }

        let k = config.kernel_size;
        let sources = config.sources.len();
        let mut layout = Vec::new();

        for idx in 0..config.depth {
            let ch = config.layer_channels(idx);
            let (chin, chin_t) = if idx == 0 {
                (config.spectrogram_channels(), config.audio_channels)
            } else {
                (config.layer_channels(idx - 1), config.layer_channels(idx - 1))
            };
            conv(&mut layout, &format!("encoder.{}.conv", idx), vec![ch, chin, k, 1], false);
            conv(&mut layout, &format!("encoder.{}.rewrite", idx), vec![2 * ch, ch, 1, 1], false);
            conv(&mut layout, &format!("tencoder.{}.conv", idx), vec![ch, chin_t, k], false);
            conv(&mut layout, &format!("tencoder.{}.rewrite", idx), vec![2 * ch, ch, 1], false);
        }

        if config.freq_emb > 0.0 {
            layout.push(ParamSpec {
                name: "freq_emb.embedding.weight".to_string(),
                shape: vec![config.freq_bins() / config.stride, config.channels],
                init: Init::Embedding {
                    scale: config.emb_scale,
                },
            });
        }

        for j in 0..config.depth {
            let idx = config.depth - 1 - j;
            let ch = config.layer_channels(idx);
            let (chout, chout_t) = if idx == 0 {
                (sources * config.spectrogram_channels(), sources * config.audio_channels)
            } else {
                (config.layer_channels(idx - 1), config.layer_channels(idx - 1))
            };
            conv(&mut layout, &format!("decoder.{}.rewrite", j), vec![2 * ch, ch, 1, 1], false);
            conv(&mut layout, &format!("decoder.{}.conv_tr", j), vec![ch, chout, k, 1], true);
            conv(&mut layout, &format!("tdecoder.{}.rewrite", j), vec![2 * ch, ch, 1], false);
            conv(&mut layout, &format!("tdecoder.{}.conv_tr", j), vec![ch, chout_t, k], true);
        }
        layout
    }

    pub fn config(&self) -> &HTDemucsConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    /// Switches stochastic layers to inference behavior.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn stft_params(&self) -> StftParams {
        StftParams {
            n_fft: self.config.nfft,
            hop_length: self.config.hop_length(),
            normalized: true,
            center: true,
        }
    }

    /// Complex spectrogram of `mix` (`[batch, channels, time]`), shaped
    /// `[batch, channels, nfft / 2, ceil(time / hop)]`.
    pub fn spec(&self, mix: &Array3<f32>) -> Array4<Complex32> {
        let (batch, channels, length) = mix.dim();
        let hop = self.config.hop_length();
        let bins = self.config.freq_bins();
        let frames = self.config.frames(length);
        let pad = hop / 2 * 3;
        let params = self.stft_params();

        let mut z = Array4::from_elem((batch, channels, bins, frames), Complex32::new(0.0, 0.0));
        for b in 0..batch {
            for c in 0..channels {
                let channel = mix.slice(s![b, c, ..]).to_vec();
                let padded = pad_reflect(&channel, pad, pad + frames * hop - length);
                let full = stft(&padded, &params);
                // drop the Nyquist bin and the two frames of context on each side
                z.slice_mut(s![b, c, .., ..])
                    .assign(&full.slice(s![..bins, 2..2 + frames]));
            }
        }
        z
    }

    /// Real-valued network input derived from [`HTDemucs::spec`]: with
    /// complex-as-channels the real and imaginary parts of channel `c` land
    /// in channels `2c` and `2c + 1`, otherwise the magnitude is taken.
    pub fn magnitude(&self, z: &Array4<Complex32>) -> Array4<f32> {
        if !self.config.cac {
            return z.mapv(|v| v.norm());
        }
        let (batch, channels, bins, frames) = z.dim();
        let mut out = Array4::<f32>::zeros((batch, channels * 2, bins, frames));
        for ((b, c, f, t), v) in z.indexed_iter() {
            out[[b, 2 * c, f, t]] = v.re;
            out[[b, 2 * c + 1, f, t]] = v.im;
        }
        out
    }

    fn check_inputs(&self, mix: &Value, x: &Value) -> Result<(), TraceError> {
        let invalid = |name: &str, reason: String| {
            Err(TraceError::InvalidInput {
                name: name.to_string(),
                reason,
            })
        };
        if mix.rank() != 3 || mix.shape[1] != self.config.audio_channels {
            return invalid(
                &mix.name,
                format!("expected [batch, {}, time], got {:?}", self.config.audio_channels, mix.shape),
            );
        }
        let expected = [
            mix.shape[0],
            self.config.spectrogram_channels(),
            self.config.freq_bins(),
            self.config.frames(mix.shape[2]),
        ];
        if x.shape != expected {
            return invalid(&x.name, format!("expected {:?}, got {:?}", expected, x.shape));
        }
        Ok(())
    }

    fn param(&self, t: &mut Tracer, name: &str) -> Result<Value, TraceError> {
        let tensor = self
            .params
            .get(name)
            .map_err(|e| TraceError::Network(e.to_string()))?;
        Ok(t.parameter(name, &tensor.shape, &tensor.data))
    }

    /// Records one forward pass. Returns the spectral output
    /// `[batch, sources, spec_channels, freq, frames]` and the waveform output
    /// `[batch, sources, audio_channels, time]`.
    pub fn trace(&mut self, t: &mut Tracer, mix: &Value, x: &Value) -> Result<(Value, Value), TraceError> {
        self.check_inputs(mix, x)?;
        let depth = self.config.depth;

        t.push_scope("norm");
        let (mut x, mean, std) = normalize(t, x, &[1, 2, 3], self.config.norm_eps)?;
        let (mut xt, meant, stdt) = normalize(t, mix, &[1, 2], self.config.norm_eps)?;
        t.pop_scope();

        let mut saved = Vec::with_capacity(depth);
        let mut saved_t = Vec::with_capacity(depth);
        let mut lengths_t = Vec::with_capacity(depth);
        for idx in 0..depth {
            let prefix = format!("tencoder.{}", idx);
            t.push_scope(prefix.clone());
            lengths_t.push(t.dim(&xt, 2)?);
            let padded = pad_to_stride(t, &xt, self.config.stride as i64)?;
            xt = self.encode(t, &prefix, &padded, false)?;
            t.pop_scope();

            let prefix = format!("encoder.{}", idx);
            t.push_scope(prefix.clone());
            x = self.encode(t, &prefix, &x, true)?;
            t.pop_scope();

            if idx == 0 && self.config.freq_emb > 0.0 {
                t.push_scope("freq_emb");
                x = self.add_freq_embedding(t, &x)?;
                t.pop_scope();
            }
            saved.push(x.clone());
            saved_t.push(xt.clone());
        }

        for j in 0..depth {
            let last = j + 1 == depth;
            let missing = || TraceError::Network(format!("decoder {} has no matching encoder output", j));

            let skip = saved.pop().ok_or_else(missing)?;
            x = self.decode_freq(t, j, &x, &skip, last)?;

            let skip_t = saved_t.pop().ok_or_else(missing)?;
            let length = lengths_t.pop().ok_or_else(missing)?;
            xt = self.decode_time(t, j, &xt, &skip_t, &length, last)?;
        }

        t.push_scope("output");
        let sources = self.config.sources.len() as i64;
        let x = t.reshape(
            &x,
            &[
                0,
                sources,
                self.config.spectrogram_channels() as i64,
                self.config.freq_bins() as i64,
                -1,
            ],
        )?;
        let std = t.unsqueeze(&std, &[1])?;
        let mean = t.unsqueeze(&mean, &[1])?;
        let x = t.mul(&x, &std)?;
        let x = t.add(&x, &mean)?;

        let xt = t.reshape(&xt, &[0, sources, self.config.audio_channels as i64, -1])?;
        let stdt = t.unsqueeze(&stdt, &[1])?;
        let meant = t.unsqueeze(&meant, &[1])?;
        let xt = t.mul(&xt, &stdt)?;
        let xt = t.add(&xt, &meant)?;
        t.pop_scope();

        Ok((x, xt))
    }

    fn encode(&mut self, t: &mut Tracer, prefix: &str, x: &Value, freq: bool) -> Result<Value, TraceError> {
        let stride = self.config.stride as i64;
        let pad = self.config.kernel_size as i64 / 4;
        let (strides, pads) = if freq {
            (vec![stride, 1], vec![pad, 0, pad, 0])
        } else {
            (vec![stride], vec![pad, pad])
        };

        let w = self.param(t, &format!("{}.conv.weight", prefix))?;
        let b = self.param(t, &format!("{}.conv.bias", prefix))?;
        let y = t.conv(x, &w, &b, &strides, &pads)?;
        let y = gelu(t, &y)?;
        let y = self.rewrite(t, prefix, &y, freq)?;
        self.maybe_dropout(t, &y)
    }

    /// 1x1 convolution doubling the channels, followed by a GLU.
    fn rewrite(&self, t: &mut Tracer, prefix: &str, x: &Value, freq: bool) -> Result<Value, TraceError> {
        let w = self.param(t, &format!("{}.rewrite.weight", prefix))?;
        let b = self.param(t, &format!("{}.rewrite.bias", prefix))?;
        let spatial = if freq { 2 } else { 1 };
        let y = t.conv(x, &w, &b, &vec![1; spatial], &vec![0; 2 * spatial])?;
        glu(t, &y, 1)
    }

    fn maybe_dropout(&mut self, t: &mut Tracer, x: &Value) -> Result<Value, TraceError> {
        if !self.training || self.config.dropout == 0.0 {
            return Ok(x.clone());
        }
        self.dropout_draws += 1;
        t.dropout(x, self.config.dropout, self.dropout_draws as i64)
    }

    fn add_freq_embedding(&self, t: &mut Tracer, x: &Value) -> Result<Value, TraceError> {
        let weight = self.param(t, "freq_emb.embedding.weight")?;
        let (positions, channels) = (weight.shape[0] as i64, weight.shape[1] as i64);
        let emb = t.transpose(&weight, &[1, 0])?;
        let emb = t.reshape(&emb, &[1, channels, positions, 1])?;
        let scale = t.scalar_f32(self.config.freq_emb * self.config.emb_scale);
        let emb = t.mul(&emb, &scale)?;
        t.add(x, &emb)
    }

    fn decode_freq(&self, t: &mut Tracer, j: usize, x: &Value, skip: &Value, last: bool) -> Result<Value, TraceError> {
        let prefix = format!("decoder.{}", j);
        t.push_scope(prefix.clone());
        let stride = self.config.stride as i64;
        let pad = self.config.kernel_size as i64 / 4;

        let y = t.add(x, skip)?;
        let y = self.rewrite(t, &prefix, &y, true)?;
        let w = self.param(t, &format!("{}.conv_tr.weight", prefix))?;
        let b = self.param(t, &format!("{}.conv_tr.bias", prefix))?;
        let y = t.conv_transpose(&y, &w, &b, &[stride, 1], &[pad, 0, pad, 0])?;
        let y = if last { y } else { gelu(t, &y)? };
        t.pop_scope();
        Ok(y)
    }

    fn decode_time(
        &self,
        t: &mut Tracer,
        j: usize,
        x: &Value,
        skip: &Value,
        length: &Value,
        last: bool,
    ) -> Result<Value, TraceError> {
        let prefix = format!("tdecoder.{}", j);
        t.push_scope(prefix.clone());
        let stride = self.config.stride as i64;
        let pad = self.config.kernel_size as i64 / 4;

        let y = t.add(x, skip)?;
        let y = self.rewrite(t, &prefix, &y, false)?;
        let w = self.param(t, &format!("{}.conv_tr.weight", prefix))?;
        let b = self.param(t, &format!("{}.conv_tr.bias", prefix))?;
        let y = t.conv_transpose(&y, &w, &b, &[stride], &[pad, pad])?;
        // undo the stride padding of the matching encoder
        let start = t.constant_i64(&[0]);
        let y = t.slice(&y, &start, length, &[2])?;
        let y = if last { y } else { gelu(t, &y)? };
        t.pop_scope();
        Ok(y)
    }
}

/// Population statistics over `axes`; keeps the reduction free of
/// length-dependent constants.
fn normalize(t: &mut Tracer, x: &Value, axes: &[i64], eps: f32) -> Result<(Value, Value, Value), TraceError> {
    let mean = t.reduce_mean(x, axes)?;
    let centered = t.sub(x, &mean)?;
    let squared = t.mul(&centered, &centered)?;
    let var = t.reduce_mean(&squared, axes)?;
    let std = t.sqrt(&var)?;
    let eps = t.scalar_f32(eps);
    let denom = t.add(&std, &eps)?;
    let y = t.div(&centered, &denom)?;
    Ok((y, mean, std))
}

/// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
fn gelu(t: &mut Tracer, x: &Value) -> Result<Value, TraceError> {
    let sqrt2 = t.scalar_f32(std::f32::consts::SQRT_2);
    let scaled = t.div(x, &sqrt2)?;
    let erf = t.erf(&scaled)?;
    let one = t.scalar_f32(1.0);
    let shifted = t.add(&erf, &one)?;
    let y = t.mul(x, &shifted)?;
    let half = t.scalar_f32(0.5);
    t.mul(&y, &half)
}

fn glu(t: &mut Tracer, x: &Value, axis: i64) -> Result<Value, TraceError> {
    let halves = t.split(x, axis, 2)?;
    let gate = t.sigmoid(&halves[1])?;
    t.mul(&halves[0], &gate)
}

/// Right-pads the time axis up to the next multiple of `stride`, computing
/// the amount in-graph.
fn pad_to_stride(t: &mut Tracer, x: &Value, stride: i64) -> Result<Value, TraceError> {
    let stride = t.constant_i64(&[stride]);
    let length = t.dim(x, 2)?;
    let rem = t.rem(&length, &stride)?;
    let gap = t.sub(&stride, &rem)?;
    let amount = t.rem(&gap, &stride)?;
    let begin = t.constant_i64(&[0, 0, 0, 0, 0]);
    let pads = t.concat(&[&begin, &amount], 0)?;
    t.pad(x, &pads)
}
