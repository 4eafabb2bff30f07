//! Domain models for the component catalog.
//!
//! - [`UnitId`]: the name of a content unit, valid both as a directory name
//!   under the content root and as a catalog key.
//! - [`Manifest`]: the metadata a unit ships in its `manifest.json`. Read-only
//!   once loaded.

mod manifest;
mod unit;

pub use manifest::*;
pub use unit::*;
