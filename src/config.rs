use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tensor name -> (axis -> symbolic dimension name).
pub type AxisBindingTable = BTreeMap<String, BTreeMap<usize, String>>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read export configuration")]
    Io(#[from] std::io::Error),
    #[error("Malformed export configuration")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid export profile: {0}")]
    Profile(String),
}

/// Public names and symbolic axes of one architecture revision.
///
/// Downstream runtimes bind by these names, so they follow the published
/// PyTorch export of that revision (`add_67` is its waveform output). A new
/// network revision gets a new profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProfile {
    pub revision: String,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub dynamic_axes: AxisBindingTable,
}

impl Default for ExportProfile {
    fn default() -> Self {
        Self::htdemucs_v4()
    }
}

impl ExportProfile {
    pub fn htdemucs_v4() -> Self {
        let axis = |index: usize, name: &str| BTreeMap::from([(index, name.to_string())]);
        Self {
            revision: "htdemucs-v4".to_string(),
            input_names: vec!["input".to_string(), "x".to_string()],
            output_names: vec!["output".to_string(), "add_67".to_string()],
            dynamic_axes: BTreeMap::from([
                ("input".to_string(), axis(2, "time")),
                ("x".to_string(), axis(3, "time_freq")),
                ("output".to_string(), axis(4, "time_freq")),
                ("add_67".to_string(), axis(3, "time")),
            ]),
        }
    }

    /// Checks the name lists; axis ranges are checked against the traced
    /// graph by the verifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_names.len() != 2 || self.output_names.len() != 2 {
            return Err(ConfigError::Profile(format!(
                "expected 2 inputs and 2 outputs, got {} and {}",
                self.input_names.len(),
                self.output_names.len()
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for name in self.input_names.iter().chain(&self.output_names) {
            if name.is_empty() || !seen.insert(name.as_str()) {
                return Err(ConfigError::Profile(format!("duplicate or empty tensor name {:?}", name)));
            }
        }
        for tensor in self.dynamic_axes.keys() {
            if !seen.contains(tensor.as_str()) {
                return Err(ConfigError::Profile(format!(
                    "dynamic axes declared for unknown tensor {}",
                    tensor
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DummyInput {
    /// Reproducible waveform; exporting twice gives identical artifacts.
    Seeded(u64),
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub opset_version: i64,
    pub constant_folding: bool,
    /// Fail when a symbolic axis size is found baked into the graph.
    pub strict_dynamic_axes: bool,
    pub dummy_input: DummyInput,
    pub extension: String,
    pub profile: ExportProfile,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            opset_version: 17,
            constant_folding: true,
            strict_dynamic_axes: true,
            dummy_input: DummyInput::Random,
            extension: "onnx".to_string(),
            profile: ExportProfile::htdemucs_v4(),
        }
    }
}

impl ExportConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Split/Unsqueeze take tensor inputs from 13 on; ReduceMean keeps its
        // axes attribute up to 17.
        if !(13..=17).contains(&self.opset_version) {
            return Err(ConfigError::Profile(format!(
                "opset {} is outside the supported range 13..=17",
                self.opset_version
            )));
        }
        if self.extension.is_empty() || self.extension.contains(['/', '\\']) {
            return Err(ConfigError::Profile(format!("invalid extension {:?}", self.extension)));
        }
        self.profile.validate()
    }

    pub fn artifact_name(&self, model_name: &str) -> String {
        format!("{}.{}", model_name, self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_profile() {
        let profile = ExportProfile::htdemucs_v4();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.dynamic_axes["add_67"][&3], "time");
        assert_eq!(profile.dynamic_axes["x"][&3], "time_freq");
    }

    #[test]
    fn test_orphan_axis_declaration_is_rejected() {
        let mut profile = ExportProfile::htdemucs_v4();
        profile
            .dynamic_axes
            .insert("add_68".to_string(), BTreeMap::from([(3, "time".to_string())]));
        assert!(matches!(profile.validate(), Err(ConfigError::Profile(_))));
    }

    #[test]
    fn test_partial_config_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, r#"{"opset_version": 16, "dummy_input": "random"}"#).unwrap();

        let config = ExportConfig::from_path(&path).unwrap();
        assert_eq!(config.opset_version, 16);
        assert_eq!(config.dummy_input, DummyInput::Random);
        assert!(config.constant_folding);
        assert_eq!(config.artifact_name("htdemucs"), "htdemucs.onnx");
    }

    #[test]
    fn test_dummy_input_defaults_to_random() {
        assert_eq!(ExportConfig::default().dummy_input, DummyInput::Random);
        let config: ExportConfig = serde_json::from_str(r#"{"opset_version": 15}"#).unwrap();
        assert_eq!(config.dummy_input, DummyInput::Random);
    }

    #[test]
    fn test_missing_file_reports_cause_once() {
        let dir = tempdir().unwrap();
        let error = ExportConfig::from_path(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));

        let cause = std::error::Error::source(&error).unwrap().to_string();
        let chain = crate::error::error_chain(&error);
        assert!(chain.starts_with("Cannot read export configuration: "), "{}", chain);
        assert_eq!(chain.matches(cause.as_str()).count(), 1, "{}", chain);
    }

    #[test]
    fn test_seeded_dummy_input_parses() {
        let config: ExportConfig = serde_json::from_str(r#"{"dummy_input": {"seeded": 42}}"#).unwrap();
        assert_eq!(config.dummy_input, DummyInput::Seeded(42));
    }
}
