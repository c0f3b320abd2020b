//! Kind Registry - Validated table of object kinds
//!
//! The registry is built once at startup, either from the kind tables embedded
//! in the binary or from a user-supplied JSON/YAML file, and then passed
//! explicitly to the scheduler and the collector.

use super::{Kind, KindShape};
use crate::cache::validate_name;
use crate::error::CollectError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Embedded kind tables (compiled into the binary)
const KIND_FILES: &[&str] = &[
    include_str!("../kinds/common.json"),
    include_str!("../kinds/route53.json"),
    include_str!("../kinds/resolver.json"),
    include_str!("../kinds/ram.json"),
];

/// Where the list of regions for regional kinds comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RegionSource {
    /// Read `field` of every item of the global kind `kind`
    Kind { kind: String, field: String },
    /// A fixed list
    Static(Vec<String>),
}

impl Default for RegionSource {
    fn default() -> Self {
        RegionSource::Kind {
            kind: "regions".to_string(),
            field: "RegionName".to_string(),
        }
    }
}

/// Root structure of a kind table file
#[derive(Debug, Deserialize)]
struct KindFile {
    #[serde(default)]
    regions: Option<RegionSource>,
    #[serde(default)]
    kinds: Vec<Kind>,
}

/// Immutable, validated set of kinds in declaration order
#[derive(Debug, Clone)]
pub struct KindRegistry {
    kinds: Vec<Kind>,
    index: HashMap<String, usize>,
    regions: RegionSource,
}

impl KindRegistry {
    /// Build a registry, rejecting duplicate or uncacheable names and malformed
    /// fan-out edges.
    ///
    /// Dependencies on unknown kinds are left for the scheduler to report.
    pub fn new(kinds: Vec<Kind>, regions: RegionSource) -> Result<Self, CollectError> {
        let mut index = HashMap::new();
        for (i, kind) in kinds.iter().enumerate() {
            if index.insert(kind.name.clone(), i).is_some() {
                return Err(CollectError::InvalidRegistry(format!(
                    "duplicate kind name: {}",
                    kind.name
                )));
            }
        }

        let registry = Self {
            kinds,
            index,
            regions,
        };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), CollectError> {
        for kind in &self.kinds {
            // Kind names double as cache file names
            validate_name(&kind.name).map_err(|_| {
                CollectError::InvalidRegistry(format!("invalid kind name: {:?}", kind.name))
            })?;

            let fan_outs = kind
                .dependencies
                .iter()
                .filter(|d| d.fan_out.is_some())
                .count();
            if fan_outs > 1 {
                return Err(CollectError::InvalidRegistry(format!(
                    "{} declares {} fan-out dependencies; at most one is allowed",
                    kind.name, fan_outs
                )));
            }

            let Some((parent, _)) = kind.fan_out_edge() else {
                continue;
            };
            // Unknown parents surface as scheduling errors
            let Some(parent) = self.get(parent) else {
                continue;
            };
            let expected = if kind.global {
                KindShape::Items
            } else {
                KindShape::ByRegion
            };
            if parent.shape() != expected {
                return Err(CollectError::InvalidRegistry(format!(
                    "{} fans out over {}, which is not a plain {} kind",
                    kind.name,
                    parent.name,
                    if kind.global { "global" } else { "regional" }
                )));
            }
        }

        if let RegionSource::Kind { kind: source, .. } = &self.regions {
            if self.kinds.iter().any(|k| !k.global) {
                match self.get(source) {
                    Some(k) if k.shape() == KindShape::Items => {}
                    Some(_) => {
                        return Err(CollectError::InvalidRegistry(format!(
                            "region source {} must be a global kind without fan-out",
                            source
                        )))
                    }
                    None => {
                        return Err(CollectError::InvalidRegistry(format!(
                            "region source {} is not a registered kind",
                            source
                        )))
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse and merge kind tables; a later table's region source wins
    pub fn from_tables<S: AsRef<str>>(tables: &[S]) -> Result<Self, CollectError> {
        let mut kinds = Vec::new();
        let mut regions = None;

        for content in tables {
            let partial: KindFile = serde_json::from_str(content.as_ref()).map_err(|e| {
                CollectError::InvalidRegistry(format!("failed to parse kind table: {}", e))
            })?;
            kinds.extend(partial.kinds);
            regions = partial.regions.or(regions);
        }

        Self::new(kinds, regions.unwrap_or_default())
    }

    /// Load a kind table from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: &Path) -> Result<Self, CollectError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CollectError::InvalidRegistry(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let file: KindFile = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                CollectError::InvalidRegistry(format!("{}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                CollectError::InvalidRegistry(format!("{}: {}", path.display(), e))
            })?
        };

        Self::new(file.kinds, file.regions.unwrap_or_default())
    }

    /// Get a kind by name
    pub fn get(&self, name: &str) -> Option<&Kind> {
        self.index.get(name).map(|i| &self.kinds[*i])
    }

    /// All kinds in declaration order
    pub fn kinds(&self) -> &[Kind] {
        &self.kinds
    }

    /// All kind names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.kinds.iter().map(|k| k.name.as_str()).collect()
    }

    pub fn regions(&self) -> &RegionSource {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// The embedded kind table
pub fn default_registry() -> Result<KindRegistry, CollectError> {
    KindRegistry::from_tables(KIND_FILES)
}
