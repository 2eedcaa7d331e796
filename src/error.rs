use crate::config::ConfigError;
use crate::converter::ExportError;
use crate::loader::LoaderError;
use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a failed conversion. None of these are recoverable in-process;
/// the caller re-runs with a different model name or destination.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unsupported model type for {name}: {reason}")]
    UnsupportedModelType { name: String, reason: String },
    #[error("Could not load model {name}")]
    Lookup {
        name: String,
        #[source]
        source: LoaderError,
    },
    #[error("Invalid export configuration")]
    Config(#[from] ConfigError),
    #[error("ONNX export of {name} failed")]
    ExportTraceFailure {
        name: String,
        #[source]
        source: ExportError,
    },
    #[error("Cannot write {}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `error: cause: cause ...` for logs and the CLI.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
