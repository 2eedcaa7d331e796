use crate::ir::ModelIR;
use crate::optimizer::{OptimizationPass, OptimizerError};
use std::collections::HashSet;

/// Drops nodes whose outputs are never read, then initializers nothing reads.
pub struct DeadCodeElimination;

impl OptimizationPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code elimination"
    }

    fn apply(&self, ir: &mut ModelIR) -> Result<(), OptimizerError> {
        let mut changed = true;
        while changed {
            let used = used_values(ir);
            let initial_len = ir.nodes.len();
            ir.nodes
                .retain(|node| node.outputs.iter().any(|output| used.contains(output)));
            changed = ir.nodes.len() != initial_len;
        }

        let used = used_values(ir);
        ir.weights.retain(|name, _| used.contains(name));
        Ok(())
    }
}

fn used_values(ir: &ModelIR) -> HashSet<String> {
    let mut used: HashSet<String> = ir.outputs.iter().map(|o| o.name.clone()).collect();
    for node in &ir.nodes {
        used.extend(node.inputs.iter().cloned());
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, Node, Tensor};
    use std::collections::BTreeMap;

    fn node(name: &str, inputs: &[&str], output: &str) -> Node {
        Node {
            name: name.to_string(),
            op_type: "Add".to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_dce_removes_unused_chain() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1], DataType::F32));
        ir.nodes.push(node("dead1", &["X", "X"], "C"));
        ir.nodes.push(node("dead2", &["C", "X"], "D"));
        ir.nodes.push(node("live", &["X", "X"], "Y"));
        ir.outputs.push(Tensor::placeholder("Y", vec![1], DataType::F32));

        DeadCodeElimination.apply(&mut ir).unwrap();

        assert_eq!(ir.nodes.len(), 1);
        assert_eq!(ir.nodes[0].name, "live");
    }

    #[test]
    fn test_dce_prunes_unused_initializers() {
        let mut ir = ModelIR::new();
        ir.inputs.push(Tensor::placeholder("X", vec![1], DataType::F32));
        ir.weights
            .insert("w".to_string(), Tensor::from_f32("w", vec![1], &[1.0]));
        ir.weights
            .insert("orphan".to_string(), Tensor::from_f32("orphan", vec![1], &[2.0]));
        ir.nodes.push(node("add", &["X", "w"], "Y"));
        ir.outputs.push(Tensor::placeholder("Y", vec![1], DataType::F32));

        DeadCodeElimination.apply(&mut ir).unwrap();

        assert!(ir.weights.contains_key("w"));
        assert!(!ir.weights.contains_key("orphan"));
    }
}
