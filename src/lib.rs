//! Export of HTDemucs source-separation networks to ONNX graphs whose time
//! axes stay symbolic.

pub mod config;
pub mod converter;
pub mod dsp;
pub mod error;
pub mod exporter;
pub mod ir;
pub mod loader;
pub mod model;
pub mod optimizer;
pub mod resolver;
pub mod trace;
pub mod verifier;

pub use config::{DummyInput, ExportConfig, ExportProfile};
pub use converter::{convert, export_model, ExportEvent, ExportManifest, ExportResult};
pub use error::ConvertError;
pub use loader::{BuiltinRepository, LocalRepository, ModelRepository};
pub use model::{HTDemucs, HTDemucsConfig, LoadedModel};
pub use resolver::resolve;
