pub mod onnx {
    include!("onnx.rs");
}

pub mod onnx_exporter;

pub use onnx_exporter::OnnxExporter;

use crate::config::AxisBindingTable;
use crate::ir::ModelIR;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid dynamic axis binding: {0}")]
    InvalidBinding(String),
    #[error("Cannot write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Graph-level declarations written alongside the recorded nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSignature {
    pub opset_version: i64,
    pub dynamic_axes: AxisBindingTable,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub model_path: PathBuf,
    pub model_size: u64,
    pub external_data_path: Option<PathBuf>,
    pub external_data_size: Option<u64>,
}

pub trait ModelExporter {
    fn export(&self, ir: &ModelIR, signature: &GraphSignature, path: &Path) -> Result<ExportedFiles, ExporterError>;
}
