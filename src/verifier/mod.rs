//! Checks on the symbolic axes of a traced graph.
//!
//! A traced graph only stays valid for other clip lengths if no operator
//! received the traced length of a symbolic axis as a constant.

use crate::config::AxisBindingTable;
use crate::ir::shape_inference::{ShapeInference, ValueTable};
use crate::ir::{IrError, ModelIR, Node, Tensor};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Dynamic axes declared for {0}, which is not a graph input or output")]
    OrphanBinding(String),
    #[error("Axis {axis} of {tensor} is out of range for rank {rank}")]
    AxisOutOfRange { tensor: String, axis: usize, rank: usize },
    #[error("Symbolic dimension {symbol} has conflicting traced sizes {first} and {second}")]
    InconsistentSymbol { symbol: String, first: usize, second: usize },
    #[error("Cannot infer shapes of the traced graph")]
    Ir(#[from] IrError),
}

/// A shape-carrying constant that contains the traced size of a symbolic axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BakedDimension {
    pub node: String,
    pub op_type: String,
    pub constant: String,
    pub symbol: String,
    pub value: i64,
}

/// Inputs that carry shapes or sizes, per operator.
fn shape_inputs(op_type: &str) -> &'static [usize] {
    match op_type {
        "Reshape" | "Expand" | "Tile" | "Pad" => &[1],
        "Slice" => &[1, 2],
        "ConstantOfShape" => &[0],
        _ => &[],
    }
}

fn graph_tensor<'a>(ir: &'a ModelIR, name: &str) -> Option<&'a Tensor> {
    ir.inputs.iter().chain(&ir.outputs).find(|t| t.name == name)
}

/// Every bound tensor must be a graph input or output and every axis must
/// exist. Returns the traced size of each symbol.
pub fn check_axis_bindings(ir: &ModelIR, table: &AxisBindingTable) -> Result<BTreeMap<String, usize>, VerifierError> {
    let mut sizes = BTreeMap::new();
    for (name, axes) in table {
        let tensor = graph_tensor(ir, name).ok_or_else(|| VerifierError::OrphanBinding(name.clone()))?;
        for (&axis, symbol) in axes {
            let size = *tensor.shape.get(axis).ok_or_else(|| VerifierError::AxisOutOfRange {
                tensor: name.clone(),
                axis,
                rank: tensor.shape.len(),
            })?;
            match sizes.get(symbol) {
                Some(&first) if first != size => {
                    return Err(VerifierError::InconsistentSymbol {
                        symbol: symbol.clone(),
                        first,
                        second: size,
                    })
                }
                _ => {
                    sizes.insert(symbol.clone(), size);
                }
            }
        }
    }
    Ok(sizes)
}

/// Which axes of a value follow a symbolic input axis, and for integer
/// shape tensors which elements do.
#[derive(Debug, Clone, Default, PartialEq)]
struct Dependence {
    axes: Vec<bool>,
    elements: Vec<bool>,
}

impl Dependence {
    fn fixed(rank: usize, len: usize) -> Self {
        Self {
            axes: vec![false; rank],
            elements: vec![false; len],
        }
    }

    fn axis(&self, i: usize) -> bool {
        self.axes.get(i).copied().unwrap_or(false)
    }

    fn element(&self, i: usize) -> bool {
        self.elements.get(i).copied().unwrap_or(false)
    }

    fn any(&self) -> bool {
        self.axes.iter().chain(&self.elements).any(|&d| d)
    }
}

type DependenceTable = HashMap<String, Dependence>;

fn dependence(deps: &DependenceTable, values: &ValueTable, name: &str) -> Dependence {
    deps.get(name).cloned().unwrap_or_else(|| {
        let info = values.get(name);
        Dependence::fixed(
            info.map_or(0, |v| v.shape.len()),
            info.and_then(|v| v.known.as_ref()).map_or(0, Vec::len),
        )
    })
}

fn rank_of(values: &ValueTable, name: &str) -> usize {
    values.get(name).map_or(0, |v| v.shape.len())
}

fn known<'a>(values: &'a ValueTable, node: &Node, index: usize) -> Option<&'a [i64]> {
    node.inputs
        .get(index)
        .and_then(|name| values.get(name))
        .and_then(|v| v.known.as_deref())
}

/// Right-aligned broadcast of two dependence vectors to `rank`.
fn broadcast_or(a: &[bool], b: &[bool], rank: usize) -> Vec<bool> {
    (0..rank)
        .map(|i| {
            let from_end = rank - i;
            let pick = |v: &[bool]| v.len() >= from_end && v[v.len() - from_end];
            pick(a) || pick(b)
        })
        .collect()
}

fn propagate(node: &Node, values: &ValueTable, deps: &DependenceTable) -> Vec<Dependence> {
    let input = |i: usize| {
        node.inputs
            .get(i)
            .map(|name| dependence(deps, values, name))
            .unwrap_or_default()
    };
    let out_rank = |k: usize| node.outputs.get(k).map_or(0, |name| rank_of(values, name));
    let x = input(0);

    match node.op_type.as_str() {
        "Add" | "Sub" | "Mul" | "Div" | "Pow" | "Mod" => {
            let b = input(1);
            let n = x.elements.len().max(b.elements.len());
            let pick = |d: &Dependence, i: usize| d.element(if d.elements.len() == 1 { 0 } else { i });
            vec![Dependence {
                axes: broadcast_or(&x.axes, &b.axes, out_rank(0)),
                elements: (0..n).map(|i| pick(&x, i) || pick(&b, i)).collect(),
            }]
        }
        "Erf" | "Sigmoid" | "Sqrt" | "Identity" | "Split" | "Dropout" => {
            node.outputs.iter().map(|_| x.clone()).collect()
        }
        "ReduceMean" => {
            let rank = x.axes.len();
            let reduced: Vec<usize> = match node.attr_ints("axes") {
                Some(axes) => axes.iter().map(|&a| if a < 0 { (a + rank as i64) as usize } else { a as usize }).collect(),
                None => (0..rank).collect(),
            };
            let axes = x
                .axes
                .iter()
                .enumerate()
                .filter_map(|(i, &d)| match (reduced.contains(&i), out_rank(0) == rank) {
                    (true, true) => Some(false),
                    (true, false) => None,
                    (false, _) => Some(d),
                })
                .collect();
            vec![Dependence { axes, elements: vec![] }]
        }
        "Conv" | "ConvTranspose" => {
            let mut axes = x.axes.clone();
            if axes.len() > 1 {
                axes[1] = false;
            }
            vec![Dependence { axes, elements: vec![] }]
        }
        "Reshape" => {
            let target_dep = input(1);
            let target = known(values, node, 1).unwrap_or(&[]);
            let axes = (0..out_rank(0))
                .map(|i| match target.get(i) {
                    Some(0) => x.axis(i),
                    Some(-1) => x.any(),
                    Some(_) => target_dep.element(i),
                    None => x.any(),
                })
                .collect();
            vec![Dependence {
                axes,
                elements: x.elements.clone(),
            }]
        }
        "Transpose" => {
            let rank = x.axes.len();
            let perm: Vec<usize> = match node.attr_ints("perm") {
                Some(p) => p.iter().map(|&a| a as usize).collect(),
                None => (0..rank).rev().collect(),
            };
            vec![Dependence {
                axes: perm.iter().map(|&p| x.axis(p)).collect(),
                elements: vec![],
            }]
        }
        "Shape" => vec![Dependence {
            axes: vec![false],
            elements: x.axes.clone(),
        }],
        "Gather" => {
            let indices = known(values, node, 1).unwrap_or(&[]);
            let len = x.elements.len() as i64;
            let elements = indices
                .iter()
                .map(|&i| x.element(if i < 0 { (i + len) as usize } else { i as usize }))
                .collect();
            vec![Dependence {
                axes: vec![x.any(); out_rank(0)],
                elements,
            }]
        }
        "Unsqueeze" => {
            let rank = out_rank(0);
            let inserted: Vec<usize> = known(values, node, 1)
                .unwrap_or(&[])
                .iter()
                .map(|&a| if a < 0 { (a + rank as i64) as usize } else { a as usize })
                .collect();
            let mut source = x.axes.iter();
            let axes = (0..rank)
                .map(|i| if inserted.contains(&i) { false } else { source.next().copied().unwrap_or(false) })
                .collect();
            vec![Dependence {
                axes,
                elements: x.elements.clone(),
            }]
        }
        "Concat" => {
            let parts: Vec<Dependence> = (0..node.inputs.len()).map(input).collect();
            let rank = out_rank(0);
            vec![Dependence {
                axes: (0..rank).map(|i| parts.iter().any(|p| p.axis(i))).collect(),
                elements: parts.iter().flat_map(|p| p.elements.iter().copied()).collect(),
            }]
        }
        "Slice" => {
            let (starts, ends) = (input(1), input(2));
            let sliced: Vec<i64> = known(values, node, 3)
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| (0..starts.elements.len() as i64).collect());
            let mut axes = x.axes.clone();
            let rank = axes.len() as i64;
            for (k, &a) in sliced.iter().enumerate() {
                let a = (if a < 0 { a + rank } else { a }) as usize;
                if let Some(axis) = axes.get_mut(a) {
                    *axis = *axis || starts.element(k) || ends.element(k);
                }
            }
            vec![Dependence { axes, elements: vec![] }]
        }
        "Pad" => {
            let pads = input(1);
            let rank = x.axes.len();
            vec![Dependence {
                axes: (0..rank)
                    .map(|i| x.axis(i) || pads.element(i) || pads.element(i + rank))
                    .collect(),
                elements: vec![],
            }]
        }
        _ => {
            let any = (0..node.inputs.len()).any(|i| input(i).any());
            (0..node.outputs.len())
                .map(|k| Dependence {
                    axes: vec![any; out_rank(k)],
                    elements: vec![],
                })
                .collect()
        }
    }
}

/// Forward pass marking every axis that follows a symbolic input axis.
fn length_dependence(ir: &ModelIR, table: &AxisBindingTable, values: &ValueTable) -> DependenceTable {
    let mut deps = DependenceTable::new();
    for tensor in &ir.inputs {
        let bound = table.get(&tensor.name);
        let axes = (0..tensor.shape.len())
            .map(|i| bound.map_or(false, |axes| axes.contains_key(&i)))
            .collect();
        deps.insert(tensor.name.clone(), Dependence { axes, elements: vec![] });
    }
    for node in &ir.nodes {
        for (name, dep) in node.outputs.iter().zip(propagate(node, values, &deps)) {
            deps.insert(name.clone(), dep);
        }
    }
    deps
}

/// Positions of a shape-carrying constant that hold a size which should
/// follow the clip length.
fn length_positions(node: &Node, index: usize, len: usize, values: &ValueTable, deps: &DependenceTable) -> Vec<usize> {
    let data = dependence(deps, values, node.inputs.first().map_or("", String::as_str));
    match (node.op_type.as_str(), index) {
        // a reshape that turns a length-dependent tensor into a fixed shape
        ("Reshape", 1) => {
            let output = dependence(deps, values, node.outputs.first().map_or("", String::as_str));
            if data.any() && !output.any() {
                (0..len).collect()
            } else {
                vec![]
            }
        }
        ("Pad", 1) => {
            let rank = data.axes.len().max(1);
            (0..len).filter(|&p| data.axis(p % rank)).collect()
        }
        ("Slice", 1) | ("Slice", 2) => {
            let sliced: Vec<i64> = known(values, node, 3)
                .map(<[i64]>::to_vec)
                .unwrap_or_else(|| (0..len as i64).collect());
            let rank = data.axes.len() as i64;
            (0..len)
                .filter(|&k| {
                    sliced
                        .get(k)
                        .map_or(false, |&a| data.axis((if a < 0 { a + rank } else { a }) as usize))
                })
                .collect()
        }
        _ => (0..len).collect(),
    }
}

/// Scans shape-carrying constants for the traced sizes of the symbolic axes.
///
/// A constant only counts when the matching value sits at a position that
/// acts on a length-dependent axis; fixed axes that happen to share the
/// traced size are left alone.
pub fn audit_dynamic_axes(ir: &ModelIR, table: &AxisBindingTable) -> Result<Vec<BakedDimension>, VerifierError> {
    let sizes = check_axis_bindings(ir, table)?;
    let values = ShapeInference::infer(ir)?;
    let deps = length_dependence(ir, table, &values);

    let mut found = Vec::new();
    for node in &ir.nodes {
        for &index in shape_inputs(&node.op_type) {
            let Some(constant) = node.inputs.get(index) else {
                continue;
            };
            let Some(contents) = ir.weights.get(constant).and_then(Tensor::to_i64) else {
                continue;
            };
            let positions = length_positions(node, index, contents.len(), &values, &deps);
            for (symbol, &size) in &sizes {
                let size = size as i64;
                if size > 1 && positions.iter().any(|&p| contents[p] == size) {
                    found.push(BakedDimension {
                        node: node.name.clone(),
                        op_type: node.op_type.clone(),
                        constant: constant.clone(),
                        symbol: symbol.clone(),
                        value: size,
                    });
                }
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportProfile;
    use crate::ir::DataType;

    fn node(name: &str, op_type: &str, inputs: &[&str], output: &str) -> Node {
        Node {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes: BTreeMap::new(),
        }
    }

    fn graph(reshape_target: &[i64]) -> ModelIR {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("input", vec![1, 8, 1000], DataType::F32));
        ir.inputs.push(Tensor::placeholder("x", vec![1, 4, 32, 16], DataType::F32));
        ir.outputs.push(Tensor::placeholder("output", vec![1, 4, 4, 32, 16], DataType::F32));
        ir.outputs.push(Tensor::placeholder("add_67", vec![1, 4, 2, 1000], DataType::F32));
        ir.weights.insert(
            "target".to_string(),
            Tensor::from_i64("target", vec![reshape_target.len()], reshape_target),
        );
        ir.nodes.push(node("/output/Reshape_0", "Reshape", &["input", "target"], "add_67"));
        ir
    }

    /// `x` of shape `[1, 8, 16, frames]` reshaped to `[1, 2, 4, 16, frames]`.
    fn spectral_graph(frames: usize, target: &[i64]) -> (ModelIR, AxisBindingTable) {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("x", vec![1, 8, 16, frames], DataType::F32));
        ir.outputs
            .push(Tensor::placeholder("output", vec![1, 2, 4, 16, frames], DataType::F32));
        ir.weights
            .insert("target".to_string(), Tensor::from_i64("target", vec![5], target));
        ir.nodes.push(node("/output/Reshape_1", "Reshape", &["x", "target"], "output"));
        let table = AxisBindingTable::from([
            ("x".to_string(), BTreeMap::from([(3, "time_freq".to_string())])),
            ("output".to_string(), BTreeMap::from([(4, "time_freq".to_string())])),
        ]);
        (ir, table)
    }

    #[test]
    fn test_bindings_resolve_traced_sizes() {
        let ir = graph(&[0, 4, 2, -1]);
        let sizes = check_axis_bindings(&ir, &ExportProfile::htdemucs_v4().dynamic_axes).unwrap();
        assert_eq!(sizes["time"], 1000);
        assert_eq!(sizes["time_freq"], 16);
    }

    #[test]
    fn test_orphan_and_out_of_range_bindings() {
        let ir = graph(&[0, 4, 2, -1]);
        let mut table = ExportProfile::htdemucs_v4().dynamic_axes;
        table.insert("missing".to_string(), BTreeMap::from([(0, "batch".to_string())]));
        assert!(matches!(
            check_axis_bindings(&ir, &table),
            Err(VerifierError::OrphanBinding(_))
        ));

        let mut table = ExportProfile::htdemucs_v4().dynamic_axes;
        table.insert("x".to_string(), BTreeMap::from([(7, "time_freq".to_string())]));
        assert!(matches!(
            check_axis_bindings(&ir, &table),
            Err(VerifierError::AxisOutOfRange { axis: 7, .. })
        ));
    }

    #[test]
    fn test_audit_flags_baked_time_constant() {
        let table = ExportProfile::htdemucs_v4().dynamic_axes;
        assert!(audit_dynamic_axes(&graph(&[0, 4, 2, -1]), &table).unwrap().is_empty());

        let baked = audit_dynamic_axes(&graph(&[1, 4, 2, 1000]), &table).unwrap();
        assert_eq!(baked.len(), 1);
        assert_eq!(baked[0].symbol, "time");
        assert_eq!(baked[0].node, "/output/Reshape_0");
    }

    #[test]
    fn test_fixed_axis_sharing_the_traced_size_is_not_flagged() {
        // 16 frequency bins and 16 traced frames
        let (ir, table) = spectral_graph(16, &[0, 2, 4, 16, -1]);
        assert!(audit_dynamic_axes(&ir, &table).unwrap().is_empty());

        let (ir, table) = spectral_graph(16, &[1, 2, 4, 16, 16]);
        let baked = audit_dynamic_axes(&ir, &table).unwrap();
        assert_eq!(baked.len(), 1);
        assert_eq!(baked[0].symbol, "time_freq");
    }

    #[test]
    fn test_audit_checks_slice_bounds_per_axis() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("input", vec![4, 2, 1000], DataType::F32));
        ir.outputs.push(Tensor::placeholder("y", vec![4, 2, 1000], DataType::F32));
        ir.weights.insert("starts".to_string(), Tensor::from_i64("starts", vec![1], &[0]));
        ir.weights.insert("axes".to_string(), Tensor::from_i64("axes", vec![1], &[0]));
        ir.weights.insert("ends".to_string(), Tensor::from_i64("ends", vec![1], &[4]));
        ir.nodes.push(node("/Slice_0", "Slice", &["input", "starts", "ends", "axes"], "y"));
        let table = AxisBindingTable::from([
            ("input".to_string(), BTreeMap::from([(2, "time".to_string())])),
            ("y".to_string(), BTreeMap::from([(0, "rows".to_string())])),
        ]);
        // `rows` is traced as 4 but the sliced axis 0 does not follow the length
        assert!(audit_dynamic_axes(&ir, &table).unwrap().is_empty());

        ir.weights.insert("axes".to_string(), Tensor::from_i64("axes", vec![1], &[2]));
        ir.weights.insert("ends".to_string(), Tensor::from_i64("ends", vec![1], &[1000]));
        let baked = audit_dynamic_axes(&ir, &table).unwrap();
        assert_eq!(baked.len(), 1);
        assert_eq!(baked[0].symbol, "time");
    }
}
