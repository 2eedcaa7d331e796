use std::collections::BTreeMap;
use thiserror::Error;

pub mod shape_inference;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("Shape inference error: {0}")]
    Shape(String),
    #[error("Value {0} not found")]
    MissingValue(String),
    #[error("Value name {0} is already in use")]
    NameCollision(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DataType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::U8 | DataType::Bool => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data_type: DataType,
    pub data: Option<Vec<u8>>,
}

impl Tensor {
    /// Shape-only tensor, used for graph inputs and outputs.
    pub fn placeholder(name: impl Into<String>, shape: Vec<usize>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            shape,
            data_type,
            data: None,
        }
    }

    pub fn from_f32(name: impl Into<String>, shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            name: name.into(),
            shape,
            data_type: DataType::F32,
            data: Some(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        }
    }

    pub fn from_i64(name: impl Into<String>, shape: Vec<usize>, values: &[i64]) -> Self {
        Self {
            name: name.into(),
            shape,
            data_type: DataType::I64,
            data: Some(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        }
    }

    pub fn from_bool(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            shape: Vec::new(),
            data_type: DataType::Bool,
            data: Some(vec![value as u8]),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn to_f32(&self) -> Option<Vec<f32>> {
        if self.data_type != DataType::F32 {
            return None;
        }
        let data = self.data.as_ref()?;
        Some(
            data.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    pub fn to_i64(&self) -> Option<Vec<i64>> {
        if self.data_type != DataType::I64 {
            return None;
        }
        let data = self.data.as_ref()?;
        Some(
            data.chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name) {
            Some(Attribute::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attributes.get(name) {
            Some(Attribute::Ints(is)) => Some(is),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
}

/// Graph recorded from one traced forward pass.
///
/// Initializers are kept ordered by name so that serializing the same graph
/// twice produces identical bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelIR {
    pub nodes: Vec<Node>,
    pub weights: BTreeMap<String, Tensor>,
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

impl ModelIR {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight_bytes(&self) -> usize {
        self.weights.values().map(Tensor::byte_len).sum()
    }

    fn value_exists(&self, name: &str) -> bool {
        self.weights.contains_key(name)
            || self.inputs.iter().any(|t| t.name == name)
            || self.nodes.iter().any(|n| n.outputs.iter().any(|o| o == name))
    }

    /// Renames a value everywhere it is produced or consumed.
    pub fn rename_value(&mut self, from: &str, to: &str) -> Result<(), IrError> {
        if from == to {
            return Ok(());
        }
        if !self.value_exists(from) {
            return Err(IrError::MissingValue(from.to_string()));
        }
        if self.value_exists(to) {
            return Err(IrError::NameCollision(to.to_string()));
        }

        for node in &mut self.nodes {
            for name in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                if name == from {
                    *name = to.to_string();
                }
            }
        }
        for tensor in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if tensor.name == from {
                tensor.name = to.to_string();
            }
        }
        if let Some(mut weight) = self.weights.remove(from) {
            weight.name = to.to_string();
            self.weights.insert(to.to_string(), weight);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_node(name: &str, inputs: &[&str], output: &str) -> Node {
        Node {
            name: name.to_string(),
            op_type: "Add".to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_rename_value_updates_producers_and_outputs() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 4], DataType::F32));
        ir.nodes.push(add_node("add1", &["X", "X"], "/Add_0_output_0"));
        ir.nodes.push(add_node("add2", &["/Add_0_output_0", "X"], "/Add_1_output_0"));
        ir.outputs.push(Tensor::placeholder("/Add_1_output_0", vec![1, 4], DataType::F32));

        ir.rename_value("/Add_0_output_0", "mid").unwrap();
        ir.rename_value("/Add_1_output_0", "add_67").unwrap();

        assert_eq!(ir.nodes[0].outputs[0], "mid");
        assert_eq!(ir.nodes[1].inputs[0], "mid");
        assert_eq!(ir.nodes[1].outputs[0], "add_67");
        assert_eq!(ir.outputs[0].name, "add_67");
    }

    #[test]
    fn test_rename_value_rejects_collision() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1], DataType::F32));
        ir.nodes.push(add_node("add1", &["X", "X"], "Y"));

        assert!(matches!(ir.rename_value("Y", "X"), Err(IrError::NameCollision(_))));
        assert!(matches!(ir.rename_value("Z", "W"), Err(IrError::MissingValue(_))));
    }

    #[test]
    fn test_tensor_byte_conversions() {
        let t = Tensor::from_f32("w", vec![2], &[1.0, -2.5]);
        assert_eq!(t.byte_len(), 8);
        assert_eq!(t.to_f32().unwrap(), vec![1.0, -2.5]);
        assert!(t.to_i64().is_none());

        let s = Tensor::from_i64("s", vec![3], &[0, -1, 343980]);
        assert_eq!(s.to_i64().unwrap(), vec![0, -1, 343980]);
    }
}
