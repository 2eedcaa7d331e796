//! Records a concrete forward pass as a graph.
//!
//! Every operation is appended to a [`ModelIR`] as it is issued; output shapes
//! are computed immediately with [`ShapeInference`], and integer shape
//! arithmetic (`Shape`, `Gather`, `Mod`, ...) is evaluated eagerly so that
//! operators such as `Pad` and `Slice` get concrete sizes for this trace while
//! the graph itself keeps computing them from the input shape.
//!
//! Branches taken in Rust code (as opposed to graph operators) are frozen to
//! the path taken during the trace.

mod ops;

use crate::ir::shape_inference::{ShapeInference, ValueInfo, ValueTable};
use crate::ir::{Attribute, DataType, IrError, ModelIR, Node, Tensor};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error("Invalid network input {name}: {reason}")]
    InvalidInput { name: String, reason: String },
    #[error("Network error: {0}")]
    Network(String),
}

/// Handle to a value recorded in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub name: String,
    pub shape: Vec<usize>,
    pub data_type: DataType,
}

impl Value {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

pub struct Tracer {
    ir: ModelIR,
    values: ValueTable,
    counters: HashMap<String, usize>,
    scopes: Vec<String>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            ir: ModelIR::new(),
            values: ValueTable::new(),
            counters: HashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn push_scope(&mut self, scope: impl Into<String>) {
        self.scopes.push(scope.into());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn next_id(&mut self, kind: &str) -> usize {
        let counter = self.counters.entry(kind.to_string()).or_insert(0);
        let id = *counter;
        *counter += 1;
        id
    }

    fn scoped_name(&self, base: &str) -> String {
        if self.scopes.is_empty() {
            format!("/{}", base)
        } else {
            format!("/{}/{}", self.scopes.join("/"), base)
        }
    }

    pub fn input(&mut self, name: &str, shape: &[usize]) -> Value {
        self.ir
            .inputs
            .push(Tensor::placeholder(name, shape.to_vec(), DataType::F32));
        self.values
            .insert(name.to_string(), ValueInfo::new(shape.to_vec(), DataType::F32));
        Value {
            name: name.to_string(),
            shape: shape.to_vec(),
            data_type: DataType::F32,
        }
    }

    /// Embeds a parameter as an initializer; recording the same name twice
    /// reuses the first initializer.
    pub fn parameter(&mut self, name: &str, shape: &[usize], data: &[f32]) -> Value {
        if !self.ir.weights.contains_key(name) {
            self.register(Tensor::from_f32(name, shape.to_vec(), data), None);
        }
        Value {
            name: name.to_string(),
            shape: shape.to_vec(),
            data_type: DataType::F32,
        }
    }

    pub fn constant_i64(&mut self, values: &[i64]) -> Value {
        let id = self.next_id("Constant");
        let name = self.scoped_name(&format!("Constant_{}_output_0", id));
        self.register(
            Tensor::from_i64(&name, vec![values.len()], values),
            Some(values.to_vec()),
        )
    }

    pub fn scalar_f32(&mut self, value: f32) -> Value {
        let id = self.next_id("Constant");
        let name = self.scoped_name(&format!("Constant_{}_output_0", id));
        self.register(Tensor::from_f32(&name, Vec::new(), &[value]), None)
    }

    pub fn scalar_bool(&mut self, value: bool) -> Value {
        let id = self.next_id("Constant");
        let name = self.scoped_name(&format!("Constant_{}_output_0", id));
        self.register(Tensor::from_bool(&name, value), None)
    }

    fn register(&mut self, tensor: Tensor, known: Option<Vec<i64>>) -> Value {
        let value = Value {
            name: tensor.name.clone(),
            shape: tensor.shape.clone(),
            data_type: tensor.data_type,
        };
        self.values.insert(
            value.name.clone(),
            ValueInfo {
                shape: value.shape.clone(),
                data_type: value.data_type,
                known,
            },
        );
        self.ir.weights.insert(tensor.name.clone(), tensor);
        value
    }

    /// Integer contents of a value, when fixed for this trace.
    pub fn known(&self, value: &Value) -> Option<&[i64]> {
        self.values.get(&value.name).and_then(|v| v.known.as_deref())
    }

    pub fn op(
        &mut self,
        op_type: &str,
        inputs: &[&Value],
        attributes: Vec<(&str, Attribute)>,
    ) -> Result<Value, TraceError> {
        let mut outputs = self.op_n(op_type, inputs, attributes, 1)?;
        outputs
            .pop()
            .ok_or_else(|| TraceError::Network(format!("{} produced no output", op_type)))
    }

    pub fn op_n(
        &mut self,
        op_type: &str,
        inputs: &[&Value],
        attributes: Vec<(&str, Attribute)>,
        num_outputs: usize,
    ) -> Result<Vec<Value>, TraceError> {
        let id = self.next_id(op_type);
        let base = format!("{}_{}", op_type, id);
        let node = Node {
            name: self.scoped_name(&base),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|v| v.name.clone()).collect(),
            outputs: (0..num_outputs)
                .map(|k| self.scoped_name(&format!("{}_output_{}", base, k)))
                .collect(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        };

        let inferred = ShapeInference::infer_node(&node, &self.values)?;
        let mut outputs = Vec::with_capacity(num_outputs);
        for (name, info) in node.outputs.iter().zip(inferred) {
            outputs.push(Value {
                name: name.clone(),
                shape: info.shape.clone(),
                data_type: info.data_type,
            });
            self.values.insert(name.clone(), info);
        }
        self.ir.nodes.push(node);
        Ok(outputs)
    }

    /// Closes the trace, declaring `outputs` as the graph outputs.
    pub fn finish(mut self, outputs: &[&Value]) -> ModelIR {
        self.ir.outputs = outputs
            .iter()
            .map(|v| Tensor::placeholder(&v.name, v.shape.clone(), v.data_type))
            .collect();
        self.ir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_records_nodes_with_scoped_names() {
        let mut t = Tracer::new();
        let x = t.input("input", &[1, 2, 100]);
        t.push_scope("encoder.0");
        let y = t.add(&x, &x).unwrap();
        t.pop_scope();
        let z = t.sigmoid(&y).unwrap();

        assert_eq!(y.name, "/encoder.0/Add_0_output_0");
        assert_eq!(z.shape, vec![1, 2, 100]);

        let ir = t.finish(&[&z]);
        assert_eq!(ir.nodes.len(), 2);
        assert_eq!(ir.nodes[0].name, "/encoder.0/Add_0");
        assert_eq!(ir.outputs[0].name, z.name);
    }

    #[test]
    fn test_shape_arithmetic_is_known_during_trace() {
        let mut t = Tracer::new();
        let x = t.input("input", &[1, 2, 343980]);
        let len = t.dim(&x, 2).unwrap();
        assert_eq!(t.known(&len), Some(&[343980i64][..]));
    }

    #[test]
    fn test_parameter_is_recorded_once() {
        let mut t = Tracer::new();
        t.parameter("w", &[2], &[1.0, 2.0]);
        t.parameter("w", &[2], &[1.0, 2.0]);
        let ir = t.finish(&[]);
        assert_eq!(ir.weights.len(), 1);
    }

    #[test]
    fn test_invalid_op_reports_shape_error() {
        let mut t = Tracer::new();
        let a = t.input("a", &[1, 3]);
        let b = t.input("b", &[1, 4]);
        assert!(matches!(t.add(&a, &b), Err(TraceError::Ir(_))));
    }
}
