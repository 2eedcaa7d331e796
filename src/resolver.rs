use crate::loader::{LoaderError, ModelRepository};
use crate::model::{HTDemucs, ModelError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unsupported model type for {name}: {reason}")]
    UnsupportedModelType { name: String, reason: String },
    #[error("Could not load {name}")]
    Lookup {
        name: String,
        #[source]
        source: LoaderError,
    },
}

/// Fetches `name` and returns its exportable network in evaluation mode.
pub fn resolve<R: ModelRepository + ?Sized>(repo: &R, name: &str) -> Result<HTDemucs, ResolveError> {
    let loaded = repo.fetch(name).map_err(|source| match source {
        LoaderError::Model(ModelError::UnsupportedModelType(reason)) => ResolveError::UnsupportedModelType {
            name: name.to_string(),
            reason,
        },
        source => ResolveError::Lookup {
            name: name.to_string(),
            source,
        },
    })?;

    let mut model = loaded.into_primary().map_err(|e| ResolveError::UnsupportedModelType {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    model.eval();
    info!(
        "Resolved {} ({} sources, {} Hz)",
        name,
        model.config().sources.len(),
        model.config().samplerate
    );
    Ok(model)
}
