use crate::ir::{IrError, ModelIR};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Optimization error: {0}")]
    Error(String),
    #[error(transparent)]
    Ir(#[from] IrError),
}

pub trait OptimizationPass {
    fn name(&self) -> &'static str;

    fn apply(&self, ir: &mut ModelIR) -> Result<(), OptimizerError>;
}

pub mod constant_folding;
pub mod dce;

pub use constant_folding::ConstantFolding;
pub use dce::DeadCodeElimination;

#[derive(Default)]
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Folding (when enabled) followed by dead-code elimination.
    pub fn for_export(constant_folding: bool) -> Self {
        let mut optimizer = Self::new();
        if constant_folding {
            optimizer.add_pass(Box::new(ConstantFolding));
        }
        optimizer.add_pass(Box::new(DeadCodeElimination));
        optimizer
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn optimize(&self, ir: &mut ModelIR) -> Result<(), OptimizerError> {
        for pass in &self.passes {
            let before = (ir.nodes.len(), ir.weights.len());
            pass.apply(ir)?;
            debug!(
                "{}: {} -> {} nodes, {} -> {} initializers",
                pass.name(),
                before.0,
                ir.nodes.len(),
                before.1,
                ir.weights.len()
            );
        }
        Ok(())
    }
}
