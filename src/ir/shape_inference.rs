use crate::ir::{DataType, IrError, ModelIR, Node};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub shape: Vec<usize>,
    pub data_type: DataType,
    /// Contents of an integer tensor whose values are fixed at trace time
    /// (shape arithmetic, index constants).
    pub known: Option<Vec<i64>>,
}

impl ValueInfo {
    pub fn new(shape: Vec<usize>, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            known: None,
        }
    }

    pub fn known(shape: Vec<usize>, values: Vec<i64>) -> Self {
        Self {
            shape,
            data_type: DataType::I64,
            known: Some(values),
        }
    }
}

pub type ValueTable = HashMap<String, ValueInfo>;

pub struct ShapeInference;

impl ShapeInference {
    /// Value table holding the graph inputs and initializers.
    pub fn seed(ir: &ModelIR) -> ValueTable {
        let mut values = ValueTable::new();
        for input in &ir.inputs {
            values.insert(input.name.clone(), ValueInfo::new(input.shape.clone(), input.data_type));
        }
        for (name, weight) in &ir.weights {
            values.insert(
                name.clone(),
                ValueInfo {
                    shape: weight.shape.clone(),
                    data_type: weight.data_type,
                    known: weight.to_i64(),
                },
            );
        }
        values
    }

    pub fn infer(ir: &ModelIR) -> Result<ValueTable, IrError> {
        let mut values = Self::seed(ir);
        for node in &ir.nodes {
            let inferred = Self::infer_node(node, &values)?;
            for (name, info) in node.outputs.iter().zip(inferred) {
                values.insert(name.clone(), info);
            }
        }
        Ok(values)
    }

    /// Re-runs inference over the whole graph and checks the declared outputs.
    pub fn check_outputs(ir: &ModelIR) -> Result<(), IrError> {
        let values = Self::infer(ir)?;
        for output in &ir.outputs {
            let info = values
                .get(&output.name)
                .ok_or_else(|| IrError::MissingValue(output.name.clone()))?;
            if info.shape != output.shape {
                return Err(IrError::Shape(format!(
                    "Output {} declared as {:?} but inferred as {:?}",
                    output.name, output.shape, info.shape
                )));
            }
        }
        Ok(())
    }

    pub fn infer_node(node: &Node, values: &ValueTable) -> Result<Vec<ValueInfo>, IrError> {
        let inferred = match node.op_type.as_str() {
            "Add" | "Sub" | "Mul" | "Div" | "Pow" | "Mod" => {
                let a = input(node, values, 0)?;
                let b = input(node, values, 1)?;
                let shape = broadcast(&a.shape, &b.shape).map_err(|e| {
                    IrError::Shape(format!("{} ({}): {}", node.name, node.op_type, e))
                })?;
                let known = match (&a.known, &b.known) {
                    (Some(x), Some(y)) => fold_known(&node.op_type, x, y),
                    _ => None,
                };
                vec![ValueInfo {
                    shape,
                    data_type: a.data_type,
                    known,
                }]
            }
            "Erf" | "Sigmoid" | "Sqrt" => {
                let x = input(node, values, 0)?;
                vec![ValueInfo::new(x.shape.clone(), x.data_type)]
            }
            "Identity" => vec![input(node, values, 0)?.clone()],
            "Dropout" => {
                let x = input(node, values, 0)?;
                let mut out = vec![ValueInfo::new(x.shape.clone(), x.data_type)];
                if node.outputs.len() > 1 {
                    out.push(ValueInfo::new(x.shape.clone(), DataType::Bool));
                }
                out
            }
            "ReduceMean" => {
                let x = input(node, values, 0)?;
                let rank = x.shape.len();
                let keepdims = node.attr_int("keepdims").unwrap_or(1) != 0;
                let axes: Vec<usize> = match node.attr_ints("axes") {
                    Some(axes) => axes
                        .iter()
                        .map(|&a| normalize_axis(a, rank))
                        .collect::<Result<_, _>>()?,
                    None => (0..rank).collect(),
                };
                let mut shape = Vec::with_capacity(rank);
                for (i, &d) in x.shape.iter().enumerate() {
                    if axes.contains(&i) {
                        if keepdims {
                            shape.push(1);
                        }
                    } else {
                        shape.push(d);
                    }
                }
                vec![ValueInfo::new(shape, x.data_type)]
            }
            "Conv" | "ConvTranspose" => vec![infer_conv(node, values)?],
            "Reshape" => {
                let data = input(node, values, 0)?;
                let target = known_values(node, input(node, values, 1)?, "shape")?;
                let shape = reshape_target(&data.shape, target)
                    .map_err(|e| IrError::Shape(format!("{}: {}", node.name, e)))?;
                vec![ValueInfo {
                    shape,
                    data_type: data.data_type,
                    known: data.known.clone(),
                }]
            }
            "Transpose" => {
                let x = input(node, values, 0)?;
                let perm = match node.attr_ints("perm") {
                    Some(p) => p.to_vec(),
                    None => (0..x.shape.len() as i64).rev().collect(),
                };
                if perm.len() != x.shape.len() {
                    return Err(IrError::Shape(format!(
                        "Transpose {} has perm {:?} for rank {}",
                        node.name,
                        perm,
                        x.shape.len()
                    )));
                }
                let mut shape = Vec::with_capacity(perm.len());
                for &p in &perm {
                    shape.push(x.shape[normalize_axis(p, x.shape.len())?]);
                }
                vec![ValueInfo::new(shape, x.data_type)]
            }
            "Split" => {
                let x = input(node, values, 0)?;
                let axis = normalize_axis(node.attr_int("axis").unwrap_or(0), x.shape.len())?;
                let parts = node.outputs.len();
                let sizes: Vec<usize> = match optional_input(node, values, 1)? {
                    Some(split) => known_values(node, split, "split")?
                        .iter()
                        .map(|&s| s as usize)
                        .collect(),
                    None => {
                        if parts == 0 || x.shape[axis] % parts != 0 {
                            return Err(IrError::Shape(format!(
                                "Split {} cannot divide axis of size {} into {} parts",
                                node.name, x.shape[axis], parts
                            )));
                        }
                        vec![x.shape[axis] / parts; parts]
                    }
                };
                if sizes.iter().sum::<usize>() != x.shape[axis] {
                    return Err(IrError::Shape(format!("Split {} sizes {:?} do not cover axis", node.name, sizes)));
                }
                sizes
                    .into_iter()
                    .map(|size| {
                        let mut shape = x.shape.clone();
                        shape[axis] = size;
                        ValueInfo::new(shape, x.data_type)
                    })
                    .collect()
            }
            "Shape" => {
                let x = input(node, values, 0)?;
                let dims = x.shape.iter().map(|&d| d as i64).collect();
                vec![ValueInfo::known(vec![x.shape.len()], dims)]
            }
            "Gather" => {
                let data = input(node, values, 0)?;
                let indices = input(node, values, 1)?;
                let axis = normalize_axis(node.attr_int("axis").unwrap_or(0), data.shape.len())?;
                let mut shape = data.shape[..axis].to_vec();
                shape.extend_from_slice(&indices.shape);
                shape.extend_from_slice(&data.shape[axis + 1..]);
                let known = match (&data.known, &indices.known) {
                    (Some(d), Some(idx)) if data.shape.len() == 1 => idx
                        .iter()
                        .map(|&i| {
                            let i = if i < 0 { i + d.len() as i64 } else { i };
                            d.get(i as usize).copied()
                        })
                        .collect(),
                    _ => None,
                };
                vec![ValueInfo {
                    shape,
                    data_type: data.data_type,
                    known,
                }]
            }
            "Unsqueeze" => {
                let data = input(node, values, 0)?;
                let axes = known_values(node, input(node, values, 1)?, "axes")?;
                let out_rank = data.shape.len() + axes.len();
                let mut axes: Vec<usize> = axes
                    .iter()
                    .map(|&a| normalize_axis(a, out_rank))
                    .collect::<Result<_, _>>()?;
                axes.sort_unstable();
                let mut shape = data.shape.clone();
                for axis in axes {
                    shape.insert(axis, 1);
                }
                vec![ValueInfo {
                    shape,
                    data_type: data.data_type,
                    known: data.known.clone(),
                }]
            }
            "Concat" => {
                let first = input(node, values, 0)?;
                let rank = first.shape.len();
                let axis_attr = node
                    .attr_int("axis")
                    .ok_or_else(|| IrError::Shape(format!("Concat {} missing axis attribute", node.name)))?;
                let axis = normalize_axis(axis_attr, rank)?;
                let mut shape = first.shape.clone();
                shape[axis] = 0;
                let mut known = Some(Vec::new());
                for idx in 0..node.inputs.len() {
                    let part = input(node, values, idx)?;
                    if part.shape.len() != rank {
                        return Err(IrError::Shape(format!("Concat {} mixes ranks", node.name)));
                    }
                    for (i, (&a, &b)) in shape.iter().zip(&part.shape).enumerate() {
                        if i != axis && a != b {
                            return Err(IrError::Shape(format!(
                                "Concat {} dimension {} mismatch: {} vs {}",
                                node.name, i, a, b
                            )));
                        }
                    }
                    shape[axis] += part.shape[axis];
                    known = match (known, &part.known) {
                        (Some(mut acc), Some(k)) => {
                            acc.extend_from_slice(k);
                            Some(acc)
                        }
                        _ => None,
                    };
                }
                vec![ValueInfo {
                    shape,
                    data_type: first.data_type,
                    known,
                }]
            }
            "Slice" => vec![infer_slice(node, values)?],
            "Pad" => {
                let data = input(node, values, 0)?;
                let pads = known_values(node, input(node, values, 1)?, "pads")?;
                let rank = data.shape.len();
                if pads.len() != 2 * rank {
                    return Err(IrError::Shape(format!(
                        "Pad {} expects {} pads, got {}",
                        node.name,
                        2 * rank,
                        pads.len()
                    )));
                }
                let mut shape = Vec::with_capacity(rank);
                for (i, &d) in data.shape.iter().enumerate() {
                    let padded = d as i64 + pads[i] + pads[i + rank];
                    if padded < 0 {
                        return Err(IrError::Shape(format!("Pad {} produces negative axis {}", node.name, i)));
                    }
                    shape.push(padded as usize);
                }
                vec![ValueInfo::new(shape, data.data_type)]
            }
            other => {
                return Err(IrError::Shape(format!("Unsupported operator {} ({})", other, node.name)));
            }
        };

        if inferred.len() != node.outputs.len() {
            return Err(IrError::Shape(format!(
                "{} ({}) declares {} outputs but produces {}",
                node.name,
                node.op_type,
                node.outputs.len(),
                inferred.len()
            )));
        }
        Ok(inferred)
    }
}

fn input<'a>(node: &Node, values: &'a ValueTable, idx: usize) -> Result<&'a ValueInfo, IrError> {
    let name = node
        .inputs
        .get(idx)
        .ok_or_else(|| IrError::Shape(format!("{} ({}) expects input {}", node.name, node.op_type, idx)))?;
    values.get(name).ok_or_else(|| IrError::MissingValue(name.clone()))
}

fn optional_input<'a>(node: &Node, values: &'a ValueTable, idx: usize) -> Result<Option<&'a ValueInfo>, IrError> {
    match node.inputs.get(idx) {
        None => Ok(None),
        Some(name) if name.is_empty() => Ok(None),
        Some(name) => values
            .get(name)
            .map(Some)
            .ok_or_else(|| IrError::MissingValue(name.clone())),
    }
}

fn known_values<'a>(node: &Node, info: &'a ValueInfo, what: &str) -> Result<&'a [i64], IrError> {
    info.known.as_deref().ok_or_else(|| {
        IrError::Shape(format!("{} of {} ({}) is not known at trace time", what, node.name, node.op_type))
    })
}

fn normalize_axis(axis: i64, rank: usize) -> Result<usize, IrError> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if a < 0 || a >= r {
        return Err(IrError::Shape(format!("Axis {} out of range for rank {}", axis, rank)));
    }
    Ok(a as usize)
}

fn broadcast(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    let rank = a.len().max(b.len());
    let (off_a, off_b) = (rank - a.len(), rank - b.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let da = if i >= off_a { a[i - off_a] } else { 1 };
        let db = if i >= off_b { b[i - off_b] } else { 1 };
        let d = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return Err(format!("cannot broadcast {:?} with {:?}", a, b));
        };
        out.push(d);
    }
    Ok(out)
}

fn fold_known(op: &str, a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    let n = a.len().max(b.len());
    if !(a.len() == n || a.len() == 1) || !(b.len() == n || b.len() == 1) {
        return None;
    }
    (0..n)
        .map(|i| {
            let x = a[if a.len() == 1 { 0 } else { i }];
            let y = b[if b.len() == 1 { 0 } else { i }];
            match op {
                "Add" => x.checked_add(y),
                "Sub" => x.checked_sub(y),
                "Mul" => x.checked_mul(y),
                "Div" => x.checked_div(y),
                // integer Mod takes the sign of the divisor
                "Mod" => x.checked_rem(y).map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r }),
                _ => None,
            }
        })
        .collect()
}

fn reshape_target(input: &[usize], target: &[i64]) -> Result<Vec<usize>, String> {
    let total: usize = input.iter().product();
    let mut shape = Vec::with_capacity(target.len());
    let mut wildcard = None;
    for (i, &d) in target.iter().enumerate() {
        match d {
            0 => shape.push(
                *input
                    .get(i)
                    .ok_or_else(|| format!("0 at position {} exceeds input rank {}", i, input.len()))?,
            ),
            -1 => {
                if wildcard.replace(i).is_some() {
                    return Err("more than one -1 in reshape target".to_string());
                }
                shape.push(1);
            }
            d if d > 0 => shape.push(d as usize),
            d => return Err(format!("invalid reshape dimension {}", d)),
        }
    }
    if let Some(i) = wildcard {
        let rest: usize = shape.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, d)| d).product();
        if rest == 0 || total % rest != 0 {
            return Err(format!("cannot reshape {:?} into {:?}", input, target));
        }
        shape[i] = total / rest;
    }
    if shape.iter().product::<usize>() != total {
        return Err(format!("cannot reshape {:?} into {:?}", input, target));
    }
    Ok(shape)
}

fn infer_conv(node: &Node, values: &ValueTable) -> Result<ValueInfo, IrError> {
    let transposed = node.op_type == "ConvTranspose";
    let x = input(node, values, 0)?;
    let w = input(node, values, 1)?;
    if w.shape.len() < 3 || x.shape.len() != w.shape.len() {
        return Err(IrError::Shape(format!(
            "{} input rank {} does not match weight rank {}",
            node.name,
            x.shape.len(),
            w.shape.len()
        )));
    }
    let spatial = w.shape.len() - 2;
    let group = node.attr_int("group").unwrap_or(1).max(1) as usize;
    let kernel: Vec<i64> = match node.attr_ints("kernel_shape") {
        Some(k) => k.to_vec(),
        None => w.shape[2..].iter().map(|&k| k as i64).collect(),
    };
    let strides = node.attr_ints("strides").map(<[i64]>::to_vec).unwrap_or_else(|| vec![1; spatial]);
    let dilations = node.attr_ints("dilations").map(<[i64]>::to_vec).unwrap_or_else(|| vec![1; spatial]);
    let pads = node.attr_ints("pads").map(<[i64]>::to_vec).unwrap_or_else(|| vec![0; 2 * spatial]);
    let output_padding = node
        .attr_ints("output_padding")
        .map(<[i64]>::to_vec)
        .unwrap_or_else(|| vec![0; spatial]);
    if kernel.len() != spatial || strides.len() != spatial || dilations.len() != spatial || pads.len() != 2 * spatial {
        return Err(IrError::Shape(format!("{} has inconsistent attribute lengths", node.name)));
    }

    let out_channels = if transposed {
        if x.shape[1] != w.shape[0] {
            return Err(IrError::Shape(format!(
                "{} expects {} input channels, got {}",
                node.name, w.shape[0], x.shape[1]
            )));
        }
        w.shape[1] * group
    } else {
        if x.shape[1] != w.shape[1] * group {
            return Err(IrError::Shape(format!(
                "{} expects {} input channels, got {}",
                node.name,
                w.shape[1] * group,
                x.shape[1]
            )));
        }
        w.shape[0]
    };
    if let Some(bias) = optional_input(node, values, 2)? {
        if bias.shape != [out_channels] {
            return Err(IrError::Shape(format!("{} bias shape {:?} mismatch", node.name, bias.shape)));
        }
    }

    let mut shape = vec![x.shape[0], out_channels];
    for i in 0..spatial {
        let size = x.shape[2 + i] as i64;
        let effective_kernel = dilations[i] * (kernel[i] - 1) + 1;
        let out = if transposed {
            strides[i] * (size - 1) + output_padding[i] + effective_kernel - pads[i] - pads[i + spatial]
        } else {
            let padded = size + pads[i] + pads[i + spatial];
            if padded < effective_kernel {
                0
            } else {
                (padded - effective_kernel) / strides[i] + 1
            }
        };
        if out <= 0 {
            return Err(IrError::Shape(format!(
                "{} produces empty spatial axis {} from size {}",
                node.name, i, size
            )));
        }
        shape.push(out as usize);
    }
    Ok(ValueInfo::new(shape, x.data_type))
}

fn infer_slice(node: &Node, values: &ValueTable) -> Result<ValueInfo, IrError> {
    let data = input(node, values, 0)?;
    let rank = data.shape.len();
    let starts = known_values(node, input(node, values, 1)?, "starts")?;
    let ends = known_values(node, input(node, values, 2)?, "ends")?;
    let axes: Vec<usize> = match optional_input(node, values, 3)? {
        Some(axes) => known_values(node, axes, "axes")?
            .iter()
            .map(|&a| normalize_axis(a, rank))
            .collect::<Result<_, _>>()?,
        None => (0..starts.len()).collect(),
    };
    let steps: Vec<i64> = match optional_input(node, values, 4)? {
        Some(steps) => known_values(node, steps, "steps")?.to_vec(),
        None => vec![1; starts.len()],
    };
    if starts.len() != ends.len() || starts.len() != axes.len() || starts.len() != steps.len() {
        return Err(IrError::Shape(format!("Slice {} has inconsistent parameter lengths", node.name)));
    }

    let mut shape = data.shape.clone();
    let mut ranges = Vec::with_capacity(axes.len());
    for k in 0..axes.len() {
        let dim = shape[axes[k]] as i64;
        let step = steps[k];
        if step <= 0 {
            return Err(IrError::Shape(format!("Slice {} only supports positive steps", node.name)));
        }
        let clamp = |v: i64| {
            let v = if v < 0 { v.saturating_add(dim) } else { v };
            v.clamp(0, dim)
        };
        let (start, end) = (clamp(starts[k]), clamp(ends[k]));
        let len = if end > start { (end - start + step - 1) / step } else { 0 };
        shape[axes[k]] = len as usize;
        ranges.push((start, step, len));
    }

    let known = match (&data.known, rank, ranges.as_slice()) {
        (Some(values), 1, [(start, step, len)]) => Some(
            (0..*len)
                .map(|i| values[(start + i * step) as usize])
                .collect(),
        ),
        _ => None,
    };
    Ok(ValueInfo {
        shape,
        data_type: data.data_type,
        known,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attribute, Tensor};
    use std::collections::BTreeMap;

    fn node(op_type: &str, inputs: &[&str], outputs: &[&str], attributes: Vec<(&str, Attribute)>) -> Node {
        Node {
            name: format!("{}_node", op_type.to_lowercase()),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn shape_of(values: &ValueTable, name: &str) -> Vec<usize> {
        values[name].shape.clone()
    }

    #[test]
    fn test_infer_add_broadcast_shape() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("A", vec![1, 4, 2048, 336], DataType::F32));
        ir.inputs.push(Tensor::placeholder("B", vec![1, 1, 1, 1], DataType::F32));
        ir.nodes.push(node("Add", &["A", "B"], &["C"], vec![]));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "C"), vec![1, 4, 2048, 336]);
    }

    #[test]
    fn test_infer_conv_and_conv_transpose_lengths() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 2, 343980], DataType::F32));
        ir.weights.insert("W".to_string(), Tensor::from_f32("W", vec![48, 2, 8], &vec![0.0; 48 * 2 * 8]));
        ir.weights.insert("WT".to_string(), Tensor::from_f32("WT", vec![48, 8, 8], &vec![0.0; 48 * 8 * 8]));
        ir.nodes.push(node(
            "Conv",
            &["X", "W"],
            &["Y"],
            vec![("strides", Attribute::Ints(vec![4])), ("pads", Attribute::Ints(vec![2, 2]))],
        ));
        ir.nodes.push(node(
            "ConvTranspose",
            &["Y", "WT"],
            &["Z"],
            vec![("strides", Attribute::Ints(vec![4])), ("pads", Attribute::Ints(vec![2, 2]))],
        ));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "Y"), vec![1, 48, 85995]);
        assert_eq!(shape_of(&values, "Z"), vec![1, 8, 343980]);
    }

    #[test]
    fn test_infer_conv_rejects_channel_mismatch() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 3, 64], DataType::F32));
        ir.weights.insert("W".to_string(), Tensor::from_f32("W", vec![4, 2, 8], &vec![0.0; 64]));
        ir.nodes.push(node("Conv", &["X", "W"], &["Y"], vec![]));

        assert!(ShapeInference::infer(&ir).is_err());
    }

    #[test]
    fn test_infer_reshape_wildcards() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 16, 2048, 336], DataType::F32));
        ir.weights.insert("S".to_string(), Tensor::from_i64("S", vec![5], &[0, 4, 4, 2048, -1]));
        ir.nodes.push(node("Reshape", &["X", "S"], &["Y"], vec![]));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "Y"), vec![1, 4, 4, 2048, 336]);
    }

    #[test]
    fn test_infer_pad_from_shape_arithmetic() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 48, 85995], DataType::F32));
        ir.weights.insert("axis".to_string(), Tensor::from_i64("axis", vec![1], &[2]));
        ir.weights.insert("stride".to_string(), Tensor::from_i64("stride", vec![1], &[4]));
        ir.weights.insert("zeros".to_string(), Tensor::from_i64("zeros", vec![5], &[0; 5]));
        ir.nodes.push(node("Shape", &["X"], &["shape"], vec![]));
        ir.nodes.push(node("Gather", &["shape", "axis"], &["len"], vec![("axis", Attribute::Int(0))]));
        ir.nodes.push(node("Mod", &["len", "stride"], &["rem"], vec![]));
        ir.nodes.push(node("Sub", &["stride", "rem"], &["gap"], vec![]));
        ir.nodes.push(node("Mod", &["gap", "stride"], &["pad"], vec![]));
        ir.nodes.push(node("Concat", &["zeros", "pad"], &["pads"], vec![("axis", Attribute::Int(0))]));
        ir.nodes.push(node("Pad", &["X", "pads"], &["Y"], vec![]));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(values["pad"].known, Some(vec![1]));
        assert_eq!(shape_of(&values, "Y"), vec![1, 48, 85996]);
    }

    #[test]
    fn test_infer_slice_with_computed_end() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 8, 343984], DataType::F32));
        ir.weights.insert("starts".to_string(), Tensor::from_i64("starts", vec![1], &[0]));
        ir.weights.insert("ends".to_string(), Tensor::from_i64("ends", vec![1], &[343980]));
        ir.weights.insert("axes".to_string(), Tensor::from_i64("axes", vec![1], &[2]));
        ir.nodes.push(node("Slice", &["X", "starts", "ends", "axes"], &["Y"], vec![]));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "Y"), vec![1, 8, 343980]);
    }

    #[test]
    fn test_infer_split_and_unsqueeze() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 96, 512, 336], DataType::F32));
        ir.inputs.push(Tensor::placeholder("std", vec![1, 1, 1, 1], DataType::F32));
        ir.weights.insert("axes".to_string(), Tensor::from_i64("axes", vec![1], &[1]));
        ir.nodes.push(node("Split", &["X"], &["A", "B"], vec![("axis", Attribute::Int(1))]));
        ir.nodes.push(node("Unsqueeze", &["std", "axes"], &["std5"], vec![]));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "A"), vec![1, 48, 512, 336]);
        assert_eq!(shape_of(&values, "B"), vec![1, 48, 512, 336]);
        assert_eq!(shape_of(&values, "std5"), vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_infer_reduce_mean_keepdims() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 2, 1000], DataType::F32));
        ir.nodes.push(node(
            "ReduceMean",
            &["X"],
            &["M"],
            vec![("axes", Attribute::Ints(vec![1, 2])), ("keepdims", Attribute::Int(1))],
        ));

        let values = ShapeInference::infer(&ir).unwrap();
        assert_eq!(shape_of(&values, "M"), vec![1, 1, 1]);
    }

    #[test]
    fn test_check_outputs_detects_mismatch() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1, 10], DataType::F32));
        ir.nodes.push(node("Sigmoid", &["X"], &["Y"], vec![]));
        ir.outputs.push(Tensor::placeholder("Y", vec![1, 10], DataType::F32));
        assert!(ShapeInference::check_outputs(&ir).is_ok());

        ir.outputs[0].shape = vec![1, 11];
        assert!(ShapeInference::check_outputs(&ir).is_err());
    }

    #[test]
    fn test_unsupported_operator_is_an_error() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1], DataType::F32));
        ir.nodes.push(node("Loop", &["X"], &["Y"], vec![]));
        assert!(ShapeInference::infer(&ir).is_err());
    }
}
