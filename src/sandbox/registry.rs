use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::SandboxError;
use crate::catalog::Catalog;
use crate::models::UnitId;

pub const DEFAULT_DEMO_FILE: &str = "index.html";

/// Location of one unit's demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoArtifact {
    pub unit: UnitId,
    pub path: PathBuf,
}

/// Explicit map from catalog entry to demo artifact.
///
/// Only units present in the catalog have an entry, so an id that did not
/// survive aggregation resolves to `NotFound` without touching the filesystem.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: HashMap<UnitId, DemoArtifact>,
}

impl ArtifactRegistry {
    pub fn from_catalog(catalog: &Catalog, content_root: &Path, demo_file: &str) -> Self {
        let artifacts = catalog
            .ids()
            .map(|unit| {
                let artifact = DemoArtifact {
                    unit: unit.clone(),
                    path: content_root.join(unit.as_str()).join(demo_file),
                };
                (unit.clone(), artifact)
            })
            .collect();
        Self { artifacts }
    }

    pub fn resolve(&self, unit: &str) -> Result<&DemoArtifact, SandboxError> {
        self.artifacts
            .get(unit)
            .ok_or_else(|| SandboxError::NotFound(unit.to_string()))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Manifest;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            name: UnitId::parse(name).unwrap(),
            category: "Layout".into(),
            description: String::new(),
            tags: Default::default(),
            author: "test".into(),
            languages: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn resolves_only_catalog_entries() {
        let catalog = Catalog::from_manifests([manifest("Card")]);
        let registry = ArtifactRegistry::from_catalog(&catalog, Path::new("/srv/library"), "index.html");

        let artifact = registry.resolve("Card").unwrap();
        assert_eq!(artifact.path, Path::new("/srv/library/Card/index.html"));

        assert!(matches!(
            registry.resolve("../secrets"),
            Err(SandboxError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("Modal"),
            Err(SandboxError::NotFound(_))
        ));
    }
}
