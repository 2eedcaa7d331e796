use crate::model::{LoadedModel, ModelError};
use thiserror::Error;

pub mod builtin;
pub mod safetensors;

pub use builtin::BuiltinRepository;
pub use safetensors::LocalRepository;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Cannot read model files")]
    Io(#[from] std::io::Error),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Unknown model {name}; available: {available}")]
    UnknownModel { name: String, available: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Backing store that turns a model name into a network or an ensemble.
pub trait ModelRepository {
    fn fetch(&self, name: &str) -> Result<LoadedModel, LoaderError>;

    fn available(&self) -> Vec<String>;

    fn unknown(&self, name: &str) -> LoaderError {
        LoaderError::UnknownModel {
            name: name.to_string(),
            available: self.available().join(", "),
        }
    }
}
