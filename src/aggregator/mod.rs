//! Runtime assembly of the catalog from the index.
//!
//! The aggregator reads the index, fetches every listed manifest, and inserts
//! the ones that load and validate. A unit that fails (missing, unreachable,
//! malformed, or naming another directory) is logged and left out; it never
//! stops the rest of the pass.
//!
//! Fetches run with bounded concurrency, but results are inserted in index
//! order, so the catalog enumerates exactly as a sequential pass would. Dropping
//! the future returned by [`Aggregator::aggregate`] cancels the outstanding
//! fetches; nothing is inserted anywhere.

mod source;

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::models::{Manifest, ManifestError, UnitId};

pub use source::{DirectorySource, FetchError, HttpSource, ManifestSource};

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// The index could not be obtained, so there is nothing to aggregate.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("component index unavailable from {origin}: {error}")]
    IndexUnavailable {
        origin: String,
        #[source]
        error: FetchError,
    },

    #[error("component index from {origin} is not a JSON array of strings: {error}")]
    IndexMalformed {
        origin: String,
        #[source]
        error: serde_json::Error,
    },
}

/// Why a single unit is missing from the catalog.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("invalid unit id: {0}")]
    InvalidId(#[from] crate::models::UnitIdError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Invalid(#[from] ManifestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidId,
    FetchFailed,
    ManifestInvalid,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl UnitFailure {
    fn new(unit: impl Into<String>, error: &UnitError) -> Self {
        let kind = match error {
            UnitError::InvalidId(_) => FailureKind::InvalidId,
            UnitError::Fetch(_) => FailureKind::FetchFailed,
            UnitError::Invalid(_) => FailureKind::ManifestInvalid,
        };
        Self {
            unit: unit.into(),
            kind,
            reason: error.to_string(),
        }
    }
}

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// The index as read, in order.
    pub index: Vec<String>,
    pub catalog: Catalog,
    pub failures: Vec<UnitFailure>,
}

pub struct Aggregator<S> {
    source: S,
    concurrency: usize,
}

impl<S: ManifestSource> Aggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    /// Maximum fetches in flight. `1` fetches strictly one unit at a time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn load_index(&self) -> Result<Vec<String>, AggregateError> {
        let origin = self.source.describe();
        let bytes = self
            .source
            .fetch_index()
            .await
            .map_err(|error| AggregateError::IndexUnavailable {
                origin: origin.clone(),
                error,
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|error| AggregateError::IndexMalformed { origin, error })
    }

    /// Read the index, then aggregate it.
    pub async fn load_session(&self) -> Result<Aggregation, AggregateError> {
        let index = self.load_index().await?;
        Ok(self.aggregate(index).await)
    }

    /// Build a catalog from `index`. Never fails as a whole.
    pub async fn aggregate(&self, index: Vec<String>) -> Aggregation {
        let mut failures = Vec::new();
        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(index.len());

        for raw in &index {
            match UnitId::parse(raw.as_str()) {
                Ok(unit) if seen.insert(unit.clone()) => units.push(unit),
                Ok(unit) => warn!(unit = %unit, "Duplicate entry in component index, keeping the first"),
                Err(e) => {
                    let error = UnitError::from(e);
                    warn!(unit = %raw, error = %error, "Skipping index entry");
                    failures.push(UnitFailure::new(raw.as_str(), &error));
                }
            }
        }

        let requested = units.len();
        let results: Vec<(UnitId, Result<Manifest, UnitError>)> = stream::iter(units)
            .map(|unit| async move {
                let result = self.fetch_unit(&unit).await;
                (unit, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut catalog = Catalog::new();
        for (unit, result) in results {
            match result {
                Ok(manifest) => {
                    catalog.insert(manifest);
                }
                Err(error) => {
                    warn!(unit = %unit, error = %error, "Failed to load manifest for {}", unit);
                    failures.push(UnitFailure::new(unit.as_str(), &error));
                }
            }
        }

        info!(
            "Loaded {} of {} components from {}",
            catalog.len(),
            requested,
            self.source.describe()
        );

        Aggregation {
            index,
            catalog,
            failures,
        }
    }

    async fn fetch_unit(&self, unit: &UnitId) -> Result<Manifest, UnitError> {
        let bytes = self.source.fetch_manifest(unit).await?;
        Ok(Manifest::load_for(unit, &bytes)?)
    }
}
