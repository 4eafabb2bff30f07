//! In-memory catalog of loaded manifests.
//!
//! A [`Catalog`] is built once per session by the aggregator and is read-only
//! afterwards. It enumerates entries in index order; every query in
//! [`query`] and every [`BrowseState`] transition is a pure function over it.

mod browse;
pub mod query;

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::models::{Manifest, UnitId};

pub use browse::{BrowseState, ViewMode};
pub use query::{CatalogPage, CatalogQuery, CatalogView, DEFAULT_PAGE_SIZE};

/// Lookup of an id that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("component `{0}` not found")]
pub struct NotFound(pub String);

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Manifest>,
    positions: HashMap<UnitId, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from manifests in enumeration order.
    ///
    /// A manifest whose name is already present is dropped; the first one wins.
    pub fn from_manifests(manifests: impl IntoIterator<Item = Manifest>) -> Self {
        let mut catalog = Self::new();
        for manifest in manifests {
            catalog.insert(manifest);
        }
        catalog
    }

    /// Append a manifest under its own name. Returns `false` on a collision.
    pub(crate) fn insert(&mut self, manifest: Manifest) -> bool {
        if self.positions.contains_key(&manifest.name) {
            return false;
        }
        self.positions
            .insert(manifest.name.clone(), self.entries.len());
        self.entries.push(manifest);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Manifest> {
        self.positions.get(name).map(|&i| &self.entries[i])
    }

    /// Detail lookup: the manifest, or an explicit [`NotFound`].
    pub fn lookup(&self, name: &str) -> Result<&Manifest, NotFound> {
        self.get(name).ok_or_else(|| NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
        self.entries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.entries.iter().map(|m| &m.name)
    }

    /// Every tag used by any entry, deduplicated.
    ///
    /// Computed from the entries on each call.
    pub fn tags(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .flat_map(|m| m.tags.iter().map(String::as_str))
            .collect()
    }

    pub fn view(&self, query: &CatalogQuery) -> CatalogView<'_> {
        query::view(self, query)
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Manifest;
    type IntoIter = std::slice::Iter<'a, Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
