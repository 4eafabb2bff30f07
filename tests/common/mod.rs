#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use velvron_catalog::models::{Manifest, UnitId};

pub fn manifest_json(name: &str, description: &str, tags: &[&str]) -> String {
    serde_json::json!({
        "name": name,
        "category": "Inputs",
        "description": description,
        "tags": tags,
        "author": "velvron",
        "languages": ["html", "css"],
        "dependencies": []
    })
    .to_string()
}

pub fn make_manifest(name: &str, description: &str, tags: &[&str]) -> Manifest {
    Manifest {
        name: UnitId::parse(name).expect("valid unit id"),
        category: "Inputs".to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        author: "velvron".to_string(),
        languages: vec!["html".to_string()],
        dependencies: vec![],
    }
}

/// A content root in a temp directory, laid out like `public/`.
pub struct Library {
    dir: TempDir,
}

impl Library {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("library")).expect("Failed to create library");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.path().join("components-list.json")
    }

    /// Add a unit with a valid manifest and a demo document.
    pub fn add_unit(&self, name: &str, description: &str, tags: &[&str]) -> &Self {
        self.write(name, "manifest.json", &manifest_json(name, description, tags));
        self.write(
            name,
            "index.html",
            &format!("<!doctype html><h1>{}</h1>\n", name),
        );
        self
    }

    pub fn write(&self, unit: &str, file: &str, content: &str) -> &Self {
        let dir = self.root().join(unit);
        std::fs::create_dir_all(&dir).expect("Failed to create unit dir");
        std::fs::write(dir.join(file), content).expect("Failed to write file");
        self
    }

    pub fn write_index(&self, units: &[&str]) -> &Self {
        let body = serde_json::to_string(units).expect("Failed to encode index");
        std::fs::write(self.index_path(), body).expect("Failed to write index");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
