use super::{TraceError, Tracer, Value};
use crate::ir::Attribute;

impl Tracer {
    pub fn add(&mut self, a: &Value, b: &Value) -> Result<Value, TraceError> {
        self.op("Add", &[a, b], vec![])
    }

    pub fn sub(&mut self, a: &Value, b: &Value) -> Result<Value, TraceError> {
        self.op("Sub", &[a, b], vec![])
    }

    pub fn mul(&mut self, a: &Value, b: &Value) -> Result<Value, TraceError> {
        self.op("Mul", &[a, b], vec![])
    }

    pub fn div(&mut self, a: &Value, b: &Value) -> Result<Value, TraceError> {
        self.op("Div", &[a, b], vec![])
    }

    pub fn rem(&mut self, a: &Value, b: &Value) -> Result<Value, TraceError> {
        self.op("Mod", &[a, b], vec![])
    }

    pub fn sqrt(&mut self, x: &Value) -> Result<Value, TraceError> {
        self.op("Sqrt", &[x], vec![])
    }

    pub fn erf(&mut self, x: &Value) -> Result<Value, TraceError> {
        self.op("Erf", &[x], vec![])
    }

    pub fn sigmoid(&mut self, x: &Value) -> Result<Value, TraceError> {
        self.op("Sigmoid", &[x], vec![])
    }

    pub fn reduce_mean(&mut self, x: &Value, axes: &[i64]) -> Result<Value, TraceError> {
        self.op(
            "ReduceMean",
            &[x],
            vec![("axes", Attribute::Ints(axes.to_vec())), ("keepdims", Attribute::Int(1))],
        )
    }

    fn conv_attributes(weight: &Value, strides: &[i64], pads: &[i64]) -> Vec<(&'static str, Attribute)> {
        let kernel: Vec<i64> = weight.shape[2..].iter().map(|&k| k as i64).collect();
        vec![
            ("dilations", Attribute::Ints(vec![1; kernel.len()])),
            ("group", Attribute::Int(1)),
            ("kernel_shape", Attribute::Ints(kernel)),
            ("pads", Attribute::Ints(pads.to_vec())),
            ("strides", Attribute::Ints(strides.to_vec())),
        ]
    }

    pub fn conv(
        &mut self,
        x: &Value,
        weight: &Value,
        bias: &Value,
        strides: &[i64],
        pads: &[i64],
    ) -> Result<Value, TraceError> {
        let attributes = Self::conv_attributes(weight, strides, pads);
        self.op("Conv", &[x, weight, bias], attributes)
    }

    pub fn conv_transpose(
        &mut self,
        x: &Value,
        weight: &Value,
        bias: &Value,
        strides: &[i64],
        pads: &[i64],
    ) -> Result<Value, TraceError> {
        let attributes = Self::conv_attributes(weight, strides, pads);
        self.op("ConvTranspose", &[x, weight, bias], attributes)
    }

    /// Reshape to a constant target; use `0` to copy an input dimension and
    /// `-1` for the one inferred dimension.
    pub fn reshape(&mut self, x: &Value, shape: &[i64]) -> Result<Value, TraceError> {
        let target = self.constant_i64(shape);
        self.op("Reshape", &[x, &target], vec![])
    }

    pub fn transpose(&mut self, x: &Value, perm: &[i64]) -> Result<Value, TraceError> {
        self.op("Transpose", &[x], vec![("perm", Attribute::Ints(perm.to_vec()))])
    }

    pub fn split(&mut self, x: &Value, axis: i64, parts: usize) -> Result<Vec<Value>, TraceError> {
        self.op_n("Split", &[x], vec![("axis", Attribute::Int(axis))], parts)
    }

    pub fn unsqueeze(&mut self, x: &Value, axes: &[i64]) -> Result<Value, TraceError> {
        let axes = self.constant_i64(axes);
        self.op("Unsqueeze", &[x, &axes], vec![])
    }

    pub fn concat(&mut self, parts: &[&Value], axis: i64) -> Result<Value, TraceError> {
        self.op("Concat", parts, vec![("axis", Attribute::Int(axis))])
    }

    /// Size of `axis` of `x` as a one-element int64 tensor computed in-graph.
    pub fn dim(&mut self, x: &Value, axis: i64) -> Result<Value, TraceError> {
        let shape = self.op("Shape", &[x], vec![])?;
        let index = self.constant_i64(&[axis]);
        self.op("Gather", &[&shape, &index], vec![("axis", Attribute::Int(0))])
    }

    pub fn slice(&mut self, x: &Value, starts: &Value, ends: &Value, axes: &[i64]) -> Result<Value, TraceError> {
        let axes = self.constant_i64(axes);
        self.op("Slice", &[x, starts, ends, &axes], vec![])
    }

    /// Zero padding with in-graph pad amounts.
    pub fn pad(&mut self, x: &Value, pads: &Value) -> Result<Value, TraceError> {
        self.op("Pad", &[x, pads], vec![("mode", Attribute::String("constant".to_string()))])
    }

    pub fn dropout(&mut self, x: &Value, ratio: f32, seed: i64) -> Result<Value, TraceError> {
        let ratio = self.scalar_f32(ratio);
        let training = self.scalar_bool(true);
        self.op("Dropout", &[x, &ratio, &training], vec![("seed", Attribute::Int(seed))])
    }
}
