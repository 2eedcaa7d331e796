pub mod htdemucs;
pub mod params;

pub use htdemucs::{HTDemucs, HTDemucsConfig};
pub use params::{ParamSpec, ParamStore};

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Missing parameter: {0}")]
    MissingParameter(String),
    #[error("Parameter {name} has shape {actual:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

/// One network of an ensemble.
#[derive(Debug, Clone)]
pub enum BagMember {
    HTDemucs(HTDemucs),
    /// A network of another architecture; it can be listed but not exported.
    Unsupported { architecture: String, signature: String },
}

impl BagMember {
    pub fn architecture(&self) -> &str {
        match self {
            BagMember::HTDemucs(_) => "htdemucs",
            BagMember::Unsupported { architecture, .. } => architecture,
        }
    }
}

/// Ensemble of independently trained networks whose outputs are mixed with
/// per-source weights.
#[derive(Debug, Clone)]
pub struct ModelBag {
    pub members: Vec<BagMember>,
    pub weights: Vec<Vec<f32>>,
}

/// What a repository hands back for a model name.
#[derive(Debug, Clone)]
pub enum LoadedModel {
    Single(HTDemucs),
    Bag(ModelBag),
}

impl LoadedModel {
    /// The network to export: the model itself, or the first member of a bag.
    pub fn into_primary(self) -> Result<HTDemucs, ModelError> {
        match self {
            LoadedModel::Single(model) => Ok(model),
            LoadedModel::Bag(bag) => {
                let total = bag.members.len();
                let first = bag
                    .members
                    .into_iter()
                    .next()
                    .ok_or_else(|| ModelError::UnsupportedModelType("empty model bag".to_string()))?;
                match first {
                    BagMember::HTDemucs(model) => {
                        if total > 1 {
                            warn!("Bag holds {} models, exporting only the first", total);
                        }
                        Ok(model)
                    }
                    BagMember::Unsupported { architecture, .. } => Err(ModelError::UnsupportedModelType(
                        format!("bag member of architecture {}", architecture),
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> HTDemucs {
        let cfg = HTDemucsConfig {
            channels: 2,
            depth: 1,
            nfft: 64,
            segment: 1.0,
            samplerate: 1000,
            ..HTDemucsConfig::default()
        };
        HTDemucs::with_seed(cfg, 0).unwrap()
    }

    #[test]
    fn test_single_model_is_primary() {
        let model = LoadedModel::Single(tiny()).into_primary().unwrap();
        assert_eq!(model.config().channels, 2);
    }

    #[test]
    fn test_bag_yields_first_member() {
        let bag = ModelBag {
            members: vec![
                BagMember::HTDemucs(tiny()),
                BagMember::Unsupported {
                    architecture: "hdemucs".to_string(),
                    signature: "0d19c1c6".to_string(),
                },
            ],
            weights: vec![vec![1.0; 4], vec![1.0; 4]],
        };
        assert!(LoadedModel::Bag(bag).into_primary().is_ok());
    }

    #[test]
    fn test_bag_of_other_architecture_is_unsupported() {
        let bag = ModelBag {
            members: vec![
                BagMember::Unsupported {
                    architecture: "hdemucs".to_string(),
                    signature: "0d19c1c6".to_string(),
                },
                BagMember::HTDemucs(tiny()),
            ],
            weights: Vec::new(),
        };
        assert!(matches!(
            LoadedModel::Bag(bag).into_primary(),
            Err(ModelError::UnsupportedModelType(_))
        ));

        let empty = ModelBag {
            members: Vec::new(),
            weights: Vec::new(),
        };
        assert!(matches!(
            LoadedModel::Bag(empty).into_primary(),
            Err(ModelError::UnsupportedModelType(_))
        ));
    }
}
