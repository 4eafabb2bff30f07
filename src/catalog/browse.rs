use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use super::query::{self, CatalogQuery, CatalogView, DEFAULT_PAGE_SIZE};
use super::Catalog;

/// How a presentation layer lays out a page. Does not affect view contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

/// Gallery browsing state: search text, selected tag, page and layout.
///
/// Immutable; every transition returns a new state. Changing the search text
/// or the tag always returns to page 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseState {
    search: String,
    tag: Option<String>,
    page: usize,
    page_size: NonZeroUsize,
    view_mode: ViewMode,
}

impl Default for BrowseState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl BrowseState {
    pub fn new(page_size: NonZeroUsize) -> Self {
        Self {
            search: String::new(),
            tag: None,
            page: 1,
            page_size,
            view_mode: ViewMode::default(),
        }
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> NonZeroUsize {
        self.page_size
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn with_search(&self, search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            page: 1,
            ..self.clone()
        }
    }

    /// Select a tag; `None` or an empty string clears the filter.
    pub fn with_tag(&self, tag: Option<&str>) -> Self {
        Self {
            tag: tag.filter(|t| !t.is_empty()).map(str::to_owned),
            page: 1,
            ..self.clone()
        }
    }

    /// Jump to a page. Page numbers start at 1.
    pub fn with_page(&self, page: usize) -> Self {
        Self {
            page: page.max(1),
            ..self.clone()
        }
    }

    /// Advance one page, stopping at the last page of the current filter.
    pub fn next_page(&self, catalog: &Catalog) -> Self {
        let last = self.total_pages(catalog).max(1);
        self.with_page(self.page.saturating_add(1).min(last))
    }

    pub fn previous_page(&self) -> Self {
        self.with_page(self.page.saturating_sub(1))
    }

    pub fn with_view_mode(&self, view_mode: ViewMode) -> Self {
        Self {
            view_mode,
            ..self.clone()
        }
    }

    pub fn to_query(&self) -> CatalogQuery {
        CatalogQuery {
            query: self.search.clone(),
            tag: self.tag.clone(),
            page: self.page,
            page_size: self.page_size,
        }
    }

    pub fn total_pages(&self, catalog: &Catalog) -> usize {
        let count = query::filter(catalog, &self.search, self.tag.as_deref()).len();
        query::total_pages(count, self.page_size)
    }

    pub fn view<'a>(&self, catalog: &'a Catalog) -> CatalogView<'a> {
        query::view(catalog, &self.to_query())
    }
}
