use crate::ir::shape_inference::{ShapeInference, ValueInfo, ValueTable};
use crate::ir::{DataType, ModelIR, Node, Tensor};
use crate::optimizer::{OptimizationPass, OptimizerError};
use ndarray::{ArrayD, IxDyn};

/// Evaluates nodes whose inputs are all initializers and replaces them with
/// the result.
///
/// Only float arithmetic and layout operators are evaluated; nodes reading
/// graph inputs (directly or through `Shape`) are never touched, so
/// length-dependent shape computations stay in the graph.
pub struct ConstantFolding;

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant folding"
    }

    fn apply(&self, ir: &mut ModelIR) -> Result<(), OptimizerError> {
        let mut i = 0;
        while i < ir.nodes.len() {
            let node = &ir.nodes[i];
            let all_constants = !node.inputs.is_empty()
                && node.inputs.iter().all(|input| ir.weights.contains_key(input));
            if !all_constants || node.outputs.len() != 1 {
                i += 1;
                continue;
            }

            match fold(node, ir)? {
                Some(tensor) => {
                    ir.weights.insert(tensor.name.clone(), tensor);
                    ir.nodes.remove(i);
                }
                None => i += 1,
            }
        }
        Ok(())
    }
}

fn to_array(tensor: &Tensor) -> Result<ArrayD<f32>, OptimizerError> {
    let data = tensor
        .to_f32()
        .ok_or_else(|| OptimizerError::Error(format!("{} has no float data", tensor.name)))?;
    ArrayD::from_shape_vec(IxDyn(&tensor.shape), data).map_err(|e| OptimizerError::Error(e.to_string()))
}

fn fold(node: &Node, ir: &ModelIR) -> Result<Option<Tensor>, OptimizerError> {
    let inputs: Vec<&Tensor> = node.inputs.iter().filter_map(|name| ir.weights.get(name)).collect();
    let foldable = match node.op_type.as_str() {
        "Add" | "Sub" | "Mul" | "Div" => inputs.iter().all(|t| t.data_type == DataType::F32),
        "Transpose" | "Reshape" | "Unsqueeze" | "Identity" => inputs[0].data_type == DataType::F32,
        _ => false,
    };
    if !foldable {
        return Ok(None);
    }

    let mut values = ValueTable::new();
    for tensor in &inputs {
        values.insert(
            tensor.name.clone(),
            ValueInfo {
                shape: tensor.shape.clone(),
                data_type: tensor.data_type,
                known: tensor.to_i64(),
            },
        );
    }
    let shape = ShapeInference::infer_node(node, &values)?
        .into_iter()
        .next()
        .map(|info| info.shape)
        .ok_or_else(|| OptimizerError::Error(format!("{} has no output", node.name)))?;

    let data: Vec<f32> = match node.op_type.as_str() {
        "Add" | "Sub" | "Mul" | "Div" => {
            let a = to_array(inputs[0])?;
            let b = to_array(inputs[1])?;
            let result = match node.op_type.as_str() {
                "Add" => &a + &b,
                "Sub" => &a - &b,
                "Mul" => &a * &b,
                _ => &a / &b,
            };
            result.iter().copied().collect()
        }
        "Transpose" => {
            let a = to_array(inputs[0])?;
            let perm: Vec<usize> = match node.attr_ints("perm") {
                Some(p) => p.iter().map(|&d| d as usize).collect(),
                None => (0..a.ndim()).rev().collect(),
            };
            a.permuted_axes(IxDyn(&perm)).iter().copied().collect()
        }
        // layout-only: the data is unchanged, only the shape moves
        _ => to_array(inputs[0])?.into_raw_vec(),
    };

    if shape.iter().product::<usize>() != data.len() {
        return Err(OptimizerError::Error(format!(
            "folding {} produced {} values for shape {:?}",
            node.name,
            data.len(),
            shape
        )));
    }
    Ok(Some(Tensor::from_f32(node.outputs[0].clone(), shape, &data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Attribute;
    use std::collections::BTreeMap;

    fn node(op_type: &str, inputs: &[&str], output: &str) -> Node {
        Node {
            name: format!("/{}_0", op_type),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes: BTreeMap::new(),
        }
    }

    fn scalar(ir: &ModelIR, name: &str) -> f32 {
        ir.weights[name].to_f32().unwrap()[0]
    }

    #[test]
    fn test_constant_folding_arithmetic() {
        let mut ir = ModelIR::new();
        ir.weights.insert("A".to_string(), Tensor::from_f32("A", vec![1], &[3.0]));
        ir.weights.insert("B".to_string(), Tensor::from_f32("B", vec![1], &[2.0]));
        ir.nodes.push(node("Add", &["A", "B"], "add"));
        ir.nodes.push(node("Sub", &["A", "B"], "sub"));
        ir.nodes.push(node("Mul", &["A", "B"], "mul"));
        ir.nodes.push(node("Div", &["A", "B"], "div"));

        ConstantFolding.apply(&mut ir).unwrap();

        assert!(ir.nodes.is_empty());
        assert_eq!(scalar(&ir, "add"), 5.0);
        assert_eq!(scalar(&ir, "sub"), 1.0);
        assert_eq!(scalar(&ir, "mul"), 6.0);
        assert!((scalar(&ir, "div") - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_constant_folding_broadcasts_scalars() {
        let mut ir = ModelIR::new();
        ir.weights
            .insert("A".to_string(), Tensor::from_f32("A", vec![2, 2], &[1.0, 2.0, 3.0, 4.0]));
        ir.weights.insert("s".to_string(), Tensor::from_f32("s", vec![], &[2.0]));
        ir.nodes.push(node("Mul", &["A", "s"], "C"));

        ConstantFolding.apply(&mut ir).unwrap();

        assert_eq!(ir.weights["C"].shape, vec![2, 2]);
        assert_eq!(ir.weights["C"].to_f32().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_constant_folding_transpose_then_reshape() {
        let mut ir = ModelIR::new();
        ir.weights.insert(
            "emb".to_string(),
            Tensor::from_f32("emb", vec![2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
        );
        ir.weights
            .insert("target".to_string(), Tensor::from_i64("target", vec![4], &[1, 3, 2, 1]));
        let mut transpose = node("Transpose", &["emb"], "t");
        transpose
            .attributes
            .insert("perm".to_string(), Attribute::Ints(vec![1, 0]));
        ir.nodes.push(transpose);
        ir.nodes.push(node("Reshape", &["t", "target"], "r"));

        ConstantFolding.apply(&mut ir).unwrap();

        assert!(ir.nodes.is_empty());
        assert_eq!(ir.weights["r"].shape, vec![1, 3, 2, 1]);
        assert_eq!(
            ir.weights["r"].to_f32().unwrap(),
            vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
        );
    }

    #[test]
    fn test_nodes_reading_graph_inputs_are_kept() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1], DataType::F32));
        ir.weights.insert("B".to_string(), Tensor::from_f32("B", vec![1], &[2.0]));
        ir.nodes.push(node("Add", &["X", "B"], "Y"));

        ConstantFolding.apply(&mut ir).unwrap();

        assert_eq!(ir.nodes.len(), 1);
    }
}
