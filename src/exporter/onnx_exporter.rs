use crate::exporter::{onnx, ExportedFiles, ExporterError, GraphSignature, ModelExporter};
use crate::ir::{Attribute, DataType, ModelIR, Tensor};
use crate::verifier::check_axis_bindings;
use prost::Message;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Largest single protobuf message.
pub const PROTOBUF_LIMIT: usize = 2 * 1024 * 1024 * 1024;

/// Tensors smaller than this stay inline when weights are externalized.
pub const EXTERNAL_MIN_BYTES: usize = 1024;

pub struct OnnxExporter {
    pub producer_name: String,
    pub producer_version: String,
    /// Initializer bytes above which tensors move to `<artifact>.data`.
    pub external_data_threshold: usize,
}

impl Default for OnnxExporter {
    fn default() -> Self {
        Self {
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            external_data_threshold: PROTOBUF_LIMIT,
        }
    }
}

fn data_type(dt: DataType) -> i32 {
    let dt = match dt {
        DataType::F32 => onnx::tensor_proto::DataType::Float,
        DataType::F64 => onnx::tensor_proto::DataType::Double,
        DataType::I32 => onnx::tensor_proto::DataType::Int32,
        DataType::I64 => onnx::tensor_proto::DataType::Int64,
        DataType::U8 => onnx::tensor_proto::DataType::Uint8,
        DataType::Bool => onnx::tensor_proto::DataType::Bool,
    };
    dt as i32
}

fn attribute(name: &str, value: &Attribute) -> onnx::AttributeProto {
    use onnx::attribute_proto::AttributeType;

    let mut a = onnx::AttributeProto {
        name: Some(name.to_string()),
        ..Default::default()
    };
    match value {
        Attribute::Float(f) => {
            a.f = Some(*f);
            a.r#type = Some(AttributeType::Float as i32);
        }
        Attribute::Int(i) => {
            a.i = Some(*i);
            a.r#type = Some(AttributeType::Int as i32);
        }
        Attribute::String(s) => {
            a.s = Some(s.as_bytes().to_vec());
            a.r#type = Some(AttributeType::String as i32);
        }
        Attribute::Floats(fs) => {
            a.floats = fs.clone();
            a.r#type = Some(AttributeType::Floats as i32);
        }
        Attribute::Ints(is) => {
            a.ints = is.clone();
            a.r#type = Some(AttributeType::Ints as i32);
        }
    }
    a
}

fn value_info(tensor: &Tensor, axes: Option<&BTreeMap<usize, String>>) -> onnx::ValueInfoProto {
    use onnx::tensor_shape_proto::{dimension::Value, Dimension};

    let dim = tensor
        .shape
        .iter()
        .enumerate()
        .map(|(axis, &size)| Dimension {
            denotation: None,
            value: Some(match axes.and_then(|a| a.get(&axis)) {
                Some(symbol) => Value::DimParam(symbol.clone()),
                None => Value::DimValue(size as i64),
            }),
        })
        .collect();

    onnx::ValueInfoProto {
        name: Some(tensor.name.clone()),
        r#type: Some(onnx::TypeProto {
            denotation: None,
            value: Some(onnx::type_proto::Value::TensorType(onnx::type_proto::Tensor {
                elem_type: Some(data_type(tensor.data_type)),
                shape: Some(onnx::TensorShapeProto { dim }),
            })),
        }),
        doc_string: None,
    }
}

fn entry(key: &str, value: impl ToString) -> onnx::StringStringEntryProto {
    onnx::StringStringEntryProto {
        key: Some(key.to_string()),
        value: Some(value.to_string()),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExporterError + '_ {
    move |source| ExporterError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Side-file holding externalized tensors, `<artifact>.data`.
pub fn external_data_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".data");
    path.with_file_name(name)
}

impl OnnxExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external_data_threshold(mut self, bytes: usize) -> Self {
        self.external_data_threshold = bytes;
        self
    }

    /// Builds the model proto; externalized tensor bytes are appended to
    /// `side_data` and referenced by `side_name`.
    fn build(
        &self,
        ir: &ModelIR,
        signature: &GraphSignature,
        side_name: &str,
        side_data: &mut Vec<u8>,
    ) -> onnx::ModelProto {
        let externalize = ir.weight_bytes() > self.external_data_threshold;

        let mut graph = onnx::GraphProto {
            name: Some("main_graph".to_string()),
            ..Default::default()
        };

        for (name, tensor) in &ir.weights {
            let mut tp = onnx::TensorProto {
                name: Some(name.clone()),
                dims: tensor.shape.iter().map(|&d| d as i64).collect(),
                data_type: Some(data_type(tensor.data_type)),
                ..Default::default()
            };
            let bytes = tensor.data.as_deref().unwrap_or_default();
            if externalize && bytes.len() >= EXTERNAL_MIN_BYTES {
                let offset = side_data.len();
                side_data.extend_from_slice(bytes);
                tp.data_location = Some(onnx::tensor_proto::DataLocation::External as i32);
                tp.external_data = vec![
                    entry("location", side_name),
                    entry("offset", offset),
                    entry("length", bytes.len()),
                ];
            } else {
                tp.raw_data = Some(bytes.to_vec());
            }
            graph.initializer.push(tp);
        }

        for node in &ir.nodes {
            graph.node.push(onnx::NodeProto {
                name: Some(node.name.clone()),
                op_type: Some(node.op_type.clone()),
                input: node.inputs.clone(),
                output: node.outputs.clone(),
                attribute: node
                    .attributes
                    .iter()
                    .map(|(name, value)| attribute(name, value))
                    .collect(),
                ..Default::default()
            });
        }

        graph.input = ir
            .inputs
            .iter()
            .map(|t| value_info(t, signature.dynamic_axes.get(&t.name)))
            .collect();
        graph.output = ir
            .outputs
            .iter()
            .map(|t| value_info(t, signature.dynamic_axes.get(&t.name)))
            .collect();

        onnx::ModelProto {
            ir_version: Some(onnx::Version::IrVersion2021730 as i64),
            producer_name: Some(self.producer_name.clone()),
            producer_version: Some(self.producer_version.clone()),
            opset_import: vec![onnx::OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(signature.opset_version),
            }],
            metadata_props: signature
                .metadata
                .iter()
                .map(|(k, v)| entry(k, v))
                .collect(),
            graph: Some(graph),
            ..Default::default()
        }
    }
}

impl ModelExporter for OnnxExporter {
    fn export(&self, ir: &ModelIR, signature: &GraphSignature, path: &Path) -> Result<ExportedFiles, ExporterError> {
        check_axis_bindings(ir, &signature.dynamic_axes).map_err(|e| ExporterError::InvalidBinding(e.to_string()))?;

        let side_path = external_data_path(path);
        let side_name = side_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut side_data = Vec::new();
        let model = self.build(ir, signature, &side_name, &mut side_data);

        let mut buf = Vec::with_capacity(model.encoded_len());
        model
            .encode(&mut buf)
            .map_err(|e| ExporterError::Serialization(e.to_string()))?;
        if buf.len() > PROTOBUF_LIMIT {
            return Err(ExporterError::Serialization(format!(
                "graph of {} bytes exceeds the protobuf limit",
                buf.len()
            )));
        }

        fs::write(path, &buf).map_err(io_error(path))?;
        let model_size = fs::metadata(path).map_err(io_error(path))?.len();
        info!("Wrote {} ({} bytes, {} nodes)", path.display(), model_size, ir.nodes.len());

        if side_data.is_empty() {
            if side_path.exists() {
                debug!("Removing stale {}", side_path.display());
                fs::remove_file(&side_path).map_err(io_error(&side_path))?;
            }
            return Ok(ExportedFiles {
                model_path: path.to_path_buf(),
                model_size,
                external_data_path: None,
                external_data_size: None,
            });
        }

        fs::write(&side_path, &side_data).map_err(io_error(&side_path))?;
        info!("Wrote {} ({} bytes)", side_path.display(), side_data.len());
        Ok(ExportedFiles {
            model_path: path.to_path_buf(),
            model_size,
            external_data_size: Some(side_data.len() as u64),
            external_data_path: Some(side_path),
        })
    }
}
