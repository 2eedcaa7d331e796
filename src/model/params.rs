use super::ModelError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Uniform in `±1/sqrt(fan_in)`.
    FanIn { fan_in: usize },
    /// Standard normal divided by `scale`.
    Embedding { scale: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: Init,
}

/// Named parameter tensors of one network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    tensors: BTreeMap<String, ParamTensor>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(layout: &[ParamSpec], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = Self::new();
        for spec in layout {
            let n: usize = spec.shape.iter().product();
            let data = match spec.init {
                Init::FanIn { fan_in } => {
                    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
                    (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
                }
                Init::Embedding { scale } => (0..n)
                    .map(|_| rng.sample::<f32, _>(StandardNormal) / scale)
                    .collect(),
            };
            store.insert(&spec.name, spec.shape.clone(), data);
        }
        store
    }

    pub fn from_safetensors(bytes: &[u8]) -> Result<Self, ModelError> {
        let tensors = SafeTensors::deserialize(bytes).map_err(|e| ModelError::Checkpoint(e.to_string()))?;
        let mut store = Self::new();
        for (name, view) in tensors.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(ModelError::Checkpoint(format!(
                    "{} has dtype {:?}, expected F32",
                    name,
                    view.dtype()
                )));
            }
            let data = view
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            store.insert(&name, view.shape().to_vec(), data);
        }
        Ok(store)
    }

    pub fn to_safetensors(&self) -> Result<Vec<u8>, ModelError> {
        let buffers: Vec<(&String, &ParamTensor, Vec<u8>)> = self
            .tensors
            .iter()
            .map(|(name, t)| (name, t, t.data.iter().flat_map(|v| v.to_le_bytes()).collect()))
            .collect();
        let mut views = Vec::with_capacity(buffers.len());
        for (name, tensor, bytes) in &buffers {
            let view = TensorView::new(Dtype::F32, tensor.shape.clone(), bytes)
                .map_err(|e| ModelError::Checkpoint(e.to_string()))?;
            views.push((name.as_str(), view));
        }
        safetensors::serialize(views, &None).map_err(|e| ModelError::Checkpoint(e.to_string()))
    }

    pub fn insert(&mut self, name: &str, shape: Vec<usize>, data: Vec<f32>) {
        self.tensors.insert(name.to_string(), ParamTensor { shape, data });
    }

    pub fn get(&self, name: &str) -> Result<&ParamTensor, ModelError> {
        self.tensors
            .get(name)
            .ok_or_else(|| ModelError::MissingParameter(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn total_values(&self) -> usize {
        self.tensors.values().map(|t| t.data.len()).sum()
    }

    /// Checks that every parameter of `layout` is present with its expected shape.
    pub fn check_layout(&self, layout: &[ParamSpec]) -> Result<(), ModelError> {
        for spec in layout {
            let tensor = self.get(&spec.name)?;
            if tensor.shape != spec.shape || tensor.data.len() != spec.shape.iter().product::<usize>() {
                return Err(ModelError::ParameterShape {
                    name: spec.name.clone(),
                    expected: spec.shape.clone(),
                    actual: tensor.shape.clone(),
                });
            }
        }
        Ok(())
    }
}
