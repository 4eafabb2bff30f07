//! Search, tag filtering and pagination.
//!
//! A view is the catalog filtered by `matches_query(q) && matches_tag(t)`,
//! kept in catalog order, then sliced into pages of `page_size`. Pages are
//! 1-based; a page past the end is empty rather than an error.

use std::num::NonZeroUsize;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::Catalog;
use crate::models::Manifest;

/// Page size used by the gallery when the caller does not pick one.
pub const DEFAULT_PAGE_SIZE: NonZeroUsize = match NonZeroUsize::new(12) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogQuery {
    /// Free-text search; empty matches everything.
    pub query: String,
    /// Exact tag filter; `None` matches everything.
    pub tag: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: NonZeroUsize,
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            tag: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of filtered catalog entries, borrowed from the catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogView<'a> {
    pub items: Vec<&'a Manifest>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Owned form of [`CatalogView`], as returned by the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub items: Vec<Manifest>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl CatalogView<'_> {
    pub fn to_page(&self) -> CatalogPage {
        CatalogPage {
            items: self.items.iter().map(|m| (*m).clone()).collect(),
            page: self.page,
            total_pages: self.total_pages,
            total_items: self.total_items,
        }
    }
}

/// Case-insensitive substring match on name, description, or any tag.
pub fn matches_query(query: &str, manifest: &Manifest) -> bool {
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    manifest.name.as_str().to_lowercase().contains(&needle)
        || manifest.description.to_lowercase().contains(&needle)
        || manifest
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

/// Exact tag membership; an unset or empty tag matches everything.
///
/// Unlike [`matches_query`], this is case-sensitive and not a substring test.
pub fn matches_tag(tag: Option<&str>, manifest: &Manifest) -> bool {
    match tag {
        None | Some("") => true,
        Some(tag) => manifest.has_tag(tag),
    }
}

pub fn total_pages(count: usize, page_size: NonZeroUsize) -> usize {
    count.div_ceil(page_size.get())
}

/// Index range of `page` within a sequence of `len` items.
///
/// Page 0 and pages past the end map to an empty range.
pub fn page_range(page: usize, page_size: NonZeroUsize, len: usize) -> Range<usize> {
    let Some(first) = page.checked_sub(1) else {
        return 0..0;
    };
    let start = first.saturating_mul(page_size.get()).min(len);
    let end = start.saturating_add(page_size.get()).min(len);
    start..end
}

/// Entries matching both predicates, in catalog order.
pub fn filter<'a>(
    catalog: &'a Catalog,
    query: &str,
    tag: Option<&str>,
) -> Vec<&'a Manifest> {
    catalog
        .iter()
        .filter(|m| matches_query(query, m) && matches_tag(tag, m))
        .collect()
}

pub fn view<'a>(catalog: &'a Catalog, query: &CatalogQuery) -> CatalogView<'a> {
    let filtered = filter(catalog, &query.query, query.tag.as_deref());
    let total_items = filtered.len();
    let range = page_range(query.page, query.page_size, total_items);

    CatalogView {
        items: filtered[range].to_vec(),
        page: query.page,
        total_pages: total_pages(total_items, query.page_size),
        total_items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, size(12)), 0);
        assert_eq!(total_pages(12, size(12)), 1);
        assert_eq!(total_pages(13, size(12)), 2);
        assert_eq!(total_pages(14, size(12)), 2);
    }

    #[test]
    fn page_range_is_clamped() {
        assert_eq!(page_range(1, size(12), 14), 0..12);
        assert_eq!(page_range(2, size(12), 14), 12..14);
        assert_eq!(page_range(3, size(12), 14), 14..14);
        assert_eq!(page_range(0, size(12), 14), 0..0);
        assert_eq!(page_range(usize::MAX, size(12), 14), 14..14);
    }
}
