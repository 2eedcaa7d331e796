//! Catalog of the published pretrained model names.
//!
//! Weights are not distributed with the converter, so HTDemucs members are
//! built with seeded initialization derived from their signature. The graph
//! structure (and therefore the exported artifact layout) is the same as with
//! trained weights.

use super::{LoaderError, ModelRepository};
use crate::model::htdemucs::DEFAULT_SOURCES;
use crate::model::{BagMember, HTDemucs, HTDemucsConfig, LoadedModel, ModelBag};
use tracing::debug;

struct CatalogEntry {
    name: &'static str,
    architecture: &'static str,
    signatures: &'static [&'static str],
    /// Bags with one specialized member per source.
    per_source: bool,
    extra_sources: &'static [&'static str],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "htdemucs",
        architecture: "htdemucs",
        signatures: &["955717e8"],
        per_source: false,
        extra_sources: &[],
    },
    CatalogEntry {
        name: "htdemucs_ft",
        architecture: "htdemucs",
        signatures: &["f7e0c4bc", "d12395a8", "92cfc3b6", "04573f0d"],
        per_source: true,
        extra_sources: &[],
    },
    CatalogEntry {
        name: "htdemucs_6s",
        architecture: "htdemucs",
        signatures: &["5c90dfd2"],
        per_source: false,
        extra_sources: &["guitar", "piano"],
    },
    CatalogEntry {
        name: "hdemucs_mmi",
        architecture: "hdemucs",
        signatures: &["75fc33f5"],
        per_source: false,
        extra_sources: &[],
    },
    CatalogEntry {
        name: "mdx",
        architecture: "demucs",
        signatures: &["0d19c1c6", "7ecf8ec1", "c511e2ab", "7d865c68"],
        per_source: true,
        extra_sources: &[],
    },
    CatalogEntry {
        name: "mdx_extra",
        architecture: "hdemucs",
        signatures: &["e51eebcc", "a1d90b5c", "5d2d6c55", "cfa93e08"],
        per_source: true,
        extra_sources: &[],
    },
];

#[derive(Debug, Clone)]
pub struct BuiltinRepository {
    base_config: HTDemucsConfig,
}

impl Default for BuiltinRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRepository {
    pub fn new() -> Self {
        Self {
            base_config: HTDemucsConfig::default(),
        }
    }

    /// Overrides the configuration HTDemucs members start from. The source
    /// list of each catalog entry still applies.
    pub fn with_base_config(mut self, config: HTDemucsConfig) -> Self {
        self.base_config = config;
        self
    }

    fn build_member(&self, entry: &CatalogEntry, signature: &str) -> Result<BagMember, LoaderError> {
        if entry.architecture != "htdemucs" {
            return Ok(BagMember::Unsupported {
                architecture: entry.architecture.to_string(),
                signature: signature.to_string(),
            });
        }
        Ok(BagMember::HTDemucs(self.build_htdemucs(entry, signature)?))
    }

    fn build_htdemucs(&self, entry: &CatalogEntry, signature: &str) -> Result<HTDemucs, LoaderError> {
        let mut config = self.base_config.clone();
        config.sources = DEFAULT_SOURCES
            .iter()
            .chain(entry.extra_sources)
            .map(|s| s.to_string())
            .collect();
        let model = HTDemucs::with_seed(config, member_seed(signature))?;
        debug!(
            "Built {} member {} with {} parameters",
            entry.name,
            signature,
            model.params().total_values()
        );
        Ok(model)
    }
}

fn member_seed(signature: &str) -> u64 {
    u64::from_str_radix(signature, 16).unwrap_or(0).rotate_left(17)
}

impl ModelRepository for BuiltinRepository {
    fn fetch(&self, name: &str) -> Result<LoadedModel, LoaderError> {
        let entry = CATALOG
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| self.unknown(name))?;

        if entry.signatures.len() == 1 && entry.architecture == "htdemucs" {
            let model = self.build_htdemucs(entry, entry.signatures[0])?;
            return Ok(LoadedModel::Single(model));
        }

        let members = entry
            .signatures
            .iter()
            .map(|sig| self.build_member(entry, sig))
            .collect::<Result<Vec<_>, _>>()?;
        let num_sources = DEFAULT_SOURCES.len() + entry.extra_sources.len();
        let weights = (0..members.len())
            .map(|k| {
                if entry.per_source {
                    (0..num_sources).map(|s| if s == k { 1.0 } else { 0.0 }).collect()
                } else {
                    vec![1.0; num_sources]
                }
            })
            .collect();
        Ok(LoadedModel::Bag(ModelBag { members, weights }))
    }

    fn available(&self) -> Vec<String> {
        CATALOG.iter().map(|e| e.name.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BuiltinRepository {
        BuiltinRepository::new().with_base_config(HTDemucsConfig {
            channels: 2,
            depth: 1,
            nfft: 64,
            segment: 1.0,
            samplerate: 1000,
            ..HTDemucsConfig::default()
        })
    }

    #[test]
    fn test_catalog_lists_published_names() {
        let names = BuiltinRepository::new().available();
        assert!(names.contains(&"htdemucs".to_string()));
        assert!(names.contains(&"mdx_extra".to_string()));
    }

    #[test]
    fn test_htdemucs_is_single_model() {
        let first = match small().fetch("htdemucs").unwrap() {
            LoadedModel::Single(model) => model,
            LoadedModel::Bag(_) => panic!("expected a single model"),
        };
        let second = small().fetch("htdemucs").unwrap().into_primary().unwrap();
        assert_eq!(first.params(), second.params());
    }

    #[test]
    fn test_six_stem_variant_has_six_sources() {
        let model = small().fetch("htdemucs_6s").unwrap().into_primary().unwrap();
        assert_eq!(model.config().sources.len(), 6);
        assert_eq!(model.config().sources[5], "piano");
    }

    #[test]
    fn test_fine_tuned_bag_members_differ() {
        match small().fetch("htdemucs_ft").unwrap() {
            LoadedModel::Bag(bag) => {
                assert_eq!(bag.members.len(), 4);
                assert_eq!(bag.weights[1], vec![0.0, 1.0, 0.0, 0.0]);
                let params: Vec<_> = bag
                    .members
                    .iter()
                    .filter_map(|m| match m {
                        BagMember::HTDemucs(model) => Some(model.params().clone()),
                        BagMember::Unsupported { .. } => None,
                    })
                    .collect();
                assert_eq!(params.len(), 4);
                assert_ne!(params[0], params[1]);
            }
            LoadedModel::Single(_) => panic!("expected a bag"),
        }
    }

    #[test]
    fn test_other_architectures_are_listed_but_unsupported() {
        let loaded = small().fetch("hdemucs_mmi").unwrap();
        assert!(loaded.into_primary().is_err());
        assert!(matches!(small().fetch("nope"), Err(LoaderError::UnknownModel { .. })));
    }
}
