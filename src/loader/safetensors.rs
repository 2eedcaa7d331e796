//! Directory-backed repository: `<name>.json` descriptors next to
//! `<signature>.safetensors` weight files.

use super::{LoaderError, ModelRepository};
use crate::model::{BagMember, HTDemucs, HTDemucsConfig, LoadedModel, ModelBag, ParamStore};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MemberDescriptor {
    #[serde(default = "default_architecture")]
    architecture: String,
    signature: String,
    #[serde(default)]
    config: HTDemucsConfig,
}

fn default_architecture() -> String {
    "htdemucs".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Descriptor {
    Bag {
        models: Vec<MemberDescriptor>,
        #[serde(default)]
        weights: Vec<Vec<f32>>,
    },
    Single(MemberDescriptor),
}

#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn load_member(&self, member: MemberDescriptor) -> Result<BagMember, LoaderError> {
        if member.architecture != "htdemucs" {
            return Ok(BagMember::Unsupported {
                architecture: member.architecture,
                signature: member.signature,
            });
        }
        let path = self.root.join(format!("{}.safetensors", member.signature));
        debug!("Loading weights from {}", path.display());
        let bytes = fs::read(&path)?;
        let params = ParamStore::from_safetensors(&bytes)?;
        Ok(BagMember::HTDemucs(HTDemucs::new(member.config, params)?))
    }
}

impl ModelRepository for LocalRepository {
    fn fetch(&self, name: &str) -> Result<LoadedModel, LoaderError> {
        let path = self.root.join(format!("{}.json", name));
        if !path.is_file() {
            return Err(self.unknown(name));
        }
        let text = fs::read_to_string(&path)?;
        let descriptor: Descriptor =
            serde_json::from_str(&text).map_err(|e| LoaderError::InvalidFormat(format!("{}: {}", path.display(), e)))?;

        match descriptor {
            Descriptor::Single(member) => match self.load_member(member)? {
                BagMember::HTDemucs(model) => Ok(LoadedModel::Single(model)),
                other => Ok(LoadedModel::Bag(ModelBag {
                    members: vec![other],
                    weights: Vec::new(),
                })),
            },
            Descriptor::Bag { models, weights } => {
                let members = models
                    .into_iter()
                    .map(|m| self.load_member(m))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(LoadedModel::Bag(ModelBag { members, weights }))
            }
        }
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tiny_config() -> HTDemucsConfig {
        HTDemucsConfig {
            channels: 2,
            depth: 1,
            nfft: 64,
            segment: 1.0,
            samplerate: 1000,
            ..HTDemucsConfig::default()
        }
    }

    fn write_weights(dir: &Path, signature: &str, config: &HTDemucsConfig) {
        let params = ParamStore::seeded(&HTDemucs::parameter_layout(config), 5);
        fs::write(
            dir.join(format!("{}.safetensors", signature)),
            params.to_safetensors().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_single_descriptor() {
        let dir = tempdir().unwrap();
        write_weights(dir.path(), "abc123", &tiny_config());
        let descriptor = serde_json::json!({
            "signature": "abc123",
            "config": tiny_config(),
        });
        fs::write(dir.path().join("tiny.json"), descriptor.to_string()).unwrap();

        let repo = LocalRepository::new(dir.path());
        assert_eq!(repo.available(), vec!["tiny".to_string()]);
        let loaded = repo.fetch("tiny").unwrap();
        assert!(matches!(loaded, LoadedModel::Single(_)));
    }

    #[test]
    fn test_bag_descriptor() {
        let dir = tempdir().unwrap();
        write_weights(dir.path(), "m1", &tiny_config());
        let descriptor = serde_json::json!({
            "models": [
                { "signature": "m1", "config": tiny_config() },
                { "architecture": "hdemucs", "signature": "m2" },
            ],
            "weights": [[1.0, 1.0, 1.0, 1.0], [1.0, 1.0, 1.0, 1.0]],
        });
        fs::write(dir.path().join("pair.json"), descriptor.to_string()).unwrap();

        match LocalRepository::new(dir.path()).fetch("pair").unwrap() {
            LoadedModel::Bag(bag) => {
                assert_eq!(bag.members.len(), 2);
                assert_eq!(bag.members[1].architecture(), "hdemucs");
            }
            LoadedModel::Single(_) => panic!("expected a bag"),
        }
    }

    #[test]
    fn test_missing_weights_and_unknown_names() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), r#"{"signature": "nowhere"}"#).unwrap();
        let repo = LocalRepository::new(dir.path());

        assert!(matches!(repo.fetch("broken"), Err(LoaderError::Io(_))));
        assert!(matches!(repo.fetch("absent"), Err(LoaderError::UnknownModel { .. })));
    }
}
