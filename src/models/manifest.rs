use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::UnitId;

/// Metadata a unit publishes about itself in its `manifest.json`.
///
/// Every field is required. `tags` is a set: order in the file is irrelevant
/// and duplicates collapse on load. `languages` and `dependencies` keep their
/// declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Must equal the directory the manifest was loaded from.
    pub name: UnitId,
    pub category: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub author: String,
    pub languages: Vec<String>,
    pub dependencies: Vec<String>,
}

/// Why a manifest was rejected.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("manifest does not describe a component: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("manifest name `{found}` does not match directory `{expected}`")]
    NameMismatch { expected: UnitId, found: UnitId },
}

impl Manifest {
    /// Syntax-only check: the bytes are well-formed JSON.
    ///
    /// This is the bar a candidate directory has to clear to enter the index.
    pub fn check_syntax(bytes: &[u8]) -> Result<(), ManifestError> {
        serde_json::from_slice::<serde_json::Value>(bytes)
            .map(|_| ())
            .map_err(ManifestError::Syntax)
    }

    /// Parse a manifest without checking where it came from.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(ManifestError::Syntax)?;
        serde_json::from_value(value).map_err(ManifestError::Schema)
    }

    /// Parse a manifest loaded for `expected` and verify its `name`.
    pub fn load_for(expected: &UnitId, bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest = Self::parse(bytes)?;
        if &manifest.name != expected {
            return Err(ManifestError::NameMismatch {
                expected: expected.clone(),
                found: manifest.name,
            });
        }
        Ok(manifest)
    }

    /// Exact, case-sensitive tag membership.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
