//! Dynamic-shape export of an HTDemucs network.
//!
//! The network is traced once on a dummy clip of its own training length.
//! The graph it records computes every length-dependent size from its input
//! shapes, which is what lets the time axes of `input`, `x`, `output` and the
//! waveform output stay symbolic. Branches decided in Rust code are frozen to
//! the path taken during that one trace.

pub mod dummy;

use crate::config::{ConfigError, ExportConfig};
use crate::error::{error_chain, ConvertError};
use crate::exporter::{ExporterError, GraphSignature, ModelExporter, OnnxExporter};
use crate::ir::shape_inference::ShapeInference;
use crate::ir::{IrError, ModelIR, Tensor};
use crate::loader::ModelRepository;
use crate::model::{HTDemucs, ModelError};
use crate::optimizer::{Optimizer, OptimizerError};
use crate::resolver::{resolve, ResolveError};
use crate::trace::{TraceError, Tracer};
use crate::verifier::{audit_dynamic_axes, check_axis_bindings, VerifierError};
use dummy::{dummy_inputs, DummyError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dummy(#[from] DummyError),
    #[error("Tracing failed")]
    Trace(#[from] TraceError),
    #[error("Invalid graph")]
    Graph(#[from] IrError),
    #[error("Optimization failed")]
    Optimize(#[from] OptimizerError),
    #[error(transparent)]
    Verify(#[from] VerifierError),
    #[error("Symbolic axes baked into the graph: {0}")]
    BakedDimensions(String),
    #[error("Serialization failed")]
    Export(#[from] ExporterError),
}

/// Progress of one export, reported before each step.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Resolving { model: String },
    SynthesizingInput { shape: Vec<usize> },
    DerivingSpectrogram { shape: Vec<usize> },
    Tracing,
    Optimizing { nodes: usize },
    Serializing { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DimSpec {
    Fixed(usize),
    Symbolic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorSpec {
    pub name: String,
    /// Name of the traced value bound to `name`.
    pub traced_name: String,
    pub dims: Vec<DimSpec>,
}

/// Public contract of an exported artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportManifest {
    pub model_name: String,
    pub revision: String,
    pub opset_version: i64,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub metadata: BTreeMap<String, String>,
}

impl ExportManifest {
    pub fn tensor_names(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .map(|t| t.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub artifact_path: PathBuf,
    pub byte_size: u64,
    pub external_data_path: Option<PathBuf>,
    pub external_data_size: Option<u64>,
    pub manifest: ExportManifest,
}

fn tensor_spec(tensor: &Tensor, traced_name: &str, axes: Option<&BTreeMap<usize, String>>) -> TensorSpec {
    TensorSpec {
        name: tensor.name.clone(),
        traced_name: traced_name.to_string(),
        dims: tensor
            .shape
            .iter()
            .enumerate()
            .map(|(axis, &size)| match axes.and_then(|a| a.get(&axis)) {
                Some(symbol) => DimSpec::Symbolic(symbol.clone()),
                None => DimSpec::Fixed(size),
            })
            .collect(),
    }
}

fn metadata(model: &HTDemucs, length: usize, config: &ExportConfig) -> BTreeMap<String, String> {
    let c = model.config();
    BTreeMap::from([
        ("architecture".to_string(), "htdemucs".to_string()),
        ("audio_channels".to_string(), c.audio_channels.to_string()),
        ("hop_length".to_string(), c.hop_length().to_string()),
        ("nfft".to_string(), c.nfft.to_string()),
        ("revision".to_string(), config.profile.revision.clone()),
        ("samplerate".to_string(), c.samplerate.to_string()),
        ("segment".to_string(), c.segment.to_string()),
        ("sources".to_string(), c.sources.join(",")),
        ("training_length".to_string(), length.to_string()),
    ])
}

/// Traces `model` on its reference-length dummy input and writes
/// `<output_dir>/<model_name>.<extension>`.
pub fn export_model(
    model: &mut HTDemucs,
    model_name: &str,
    output_dir: &Path,
    config: &ExportConfig,
    on_event: &mut dyn FnMut(&ExportEvent),
) -> Result<ExportResult, ExportError> {
    let result = run_export(model, model_name, output_dir, config, on_event);
    if let Err(e) = &result {
        error!("Export of {} failed: {}", model_name, error_chain(e));
    }
    result
}

fn run_export(
    model: &mut HTDemucs,
    model_name: &str,
    output_dir: &Path,
    config: &ExportConfig,
    on_event: &mut dyn FnMut(&ExportEvent),
) -> Result<ExportResult, ExportError> {
    config.validate()?;
    let profile = &config.profile;
    if model.is_training() {
        warn!("{} is in training mode; stochastic layers will be traced", model_name);
    }

    let length = model.config().training_length()?;
    on_event(&ExportEvent::SynthesizingInput {
        shape: vec![1, model.config().audio_channels, length],
    });
    let inputs = dummy_inputs(model, length, config.dummy_input)?;
    on_event(&ExportEvent::DerivingSpectrogram {
        shape: inputs.spectrogram.shape().to_vec(),
    });
    debug!(
        "Dummy waveform {:?}, spectrogram {:?}",
        inputs.waveform.shape(),
        inputs.spectrogram.shape()
    );

    on_event(&ExportEvent::Tracing);
    let mut tracer = Tracer::new();
    let mix = tracer.input(&profile.input_names[0], inputs.waveform.shape());
    let x = tracer.input(&profile.input_names[1], inputs.spectrogram.shape());
    let (spec_out, wave_out) = model.trace(&mut tracer, &mix, &x)?;
    let mut ir = tracer.finish(&[&spec_out, &wave_out]);
    info!("Traced {} nodes, {} initializers", ir.nodes.len(), ir.weights.len());

    let traced = [spec_out.name.clone(), wave_out.name.clone()];
    for (from, to) in traced.iter().zip(&profile.output_names) {
        debug!("Binding output {} to {}", from, to);
        ir.rename_value(from, to)?;
    }
    check_axis_bindings(&ir, &profile.dynamic_axes)?;

    on_event(&ExportEvent::Optimizing { nodes: ir.nodes.len() });
    Optimizer::for_export(config.constant_folding).optimize(&mut ir)?;
    ShapeInference::check_outputs(&ir)?;
    audit(&ir, config)?;

    let manifest = manifest(&ir, model_name, &traced, config, metadata(model, length, config));
    let signature = GraphSignature {
        opset_version: config.opset_version,
        dynamic_axes: profile.dynamic_axes.clone(),
        metadata: manifest.metadata.clone(),
    };

    let path = output_dir.join(config.artifact_name(model_name));
    on_event(&ExportEvent::Serializing { path: path.clone() });
    let files = OnnxExporter::new().export(&ir, &signature, &path)?;

    Ok(ExportResult {
        artifact_path: files.model_path,
        byte_size: files.model_size,
        external_data_path: files.external_data_path,
        external_data_size: files.external_data_size,
        manifest,
    })
}

fn audit(ir: &ModelIR, config: &ExportConfig) -> Result<(), ExportError> {
    let baked = audit_dynamic_axes(ir, &config.profile.dynamic_axes)?;
    for hit in &baked {
        warn!(
            "{} ({}) reads {} = {} from constant {}",
            hit.node, hit.op_type, hit.symbol, hit.value, hit.constant
        );
    }
    if config.strict_dynamic_axes && !baked.is_empty() {
        let nodes: Vec<&str> = baked.iter().map(|b| b.node.as_str()).collect();
        return Err(ExportError::BakedDimensions(nodes.join(", ")));
    }
    Ok(())
}

fn manifest(
    ir: &ModelIR,
    model_name: &str,
    traced_outputs: &[String],
    config: &ExportConfig,
    metadata: BTreeMap<String, String>,
) -> ExportManifest {
    let axes = &config.profile.dynamic_axes;
    ExportManifest {
        model_name: model_name.to_string(),
        revision: config.profile.revision.clone(),
        opset_version: config.opset_version,
        inputs: ir
            .inputs
            .iter()
            .map(|t| tensor_spec(t, &t.name, axes.get(&t.name)))
            .collect(),
        outputs: ir
            .outputs
            .iter()
            .zip(traced_outputs)
            .map(|(t, traced)| tensor_spec(t, traced, axes.get(&t.name)))
            .collect(),
        metadata,
    }
}

/// Resolves `model_name` from `repo` and exports it into `dest`, creating
/// the directory when needed. Nothing is written when resolution fails.
pub fn convert<R: ModelRepository + ?Sized>(
    repo: &R,
    model_name: &str,
    dest: &Path,
    config: &ExportConfig,
    on_event: &mut dyn FnMut(&ExportEvent),
) -> Result<ExportResult, ConvertError> {
    config.validate()?;

    on_event(&ExportEvent::Resolving {
        model: model_name.to_string(),
    });
    let mut model = resolve(repo, model_name).map_err(|e| match e {
        ResolveError::UnsupportedModelType { name, reason } => ConvertError::UnsupportedModelType { name, reason },
        ResolveError::Lookup { name, source } => ConvertError::Lookup { name, source },
    })?;

    fs::create_dir_all(dest).map_err(|source| ConvertError::IoFailure {
        path: dest.to_path_buf(),
        source,
    })?;

    export_model(&mut model, model_name, dest, config, on_event).map_err(|e| match e {
        ExportError::Export(ExporterError::Io { path, source }) => ConvertError::IoFailure { path, source },
        source => ConvertError::ExportTraceFailure {
            name: model_name.to_string(),
            source,
        },
    })
}
