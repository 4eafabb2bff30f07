//! Velvron component catalog.
//!
//! Units live one per directory under a content root, each with a
//! `manifest.json` and a demo document. The [`scanner`] writes the index of
//! units, the [`aggregator`] turns the index into a [`catalog::Catalog`], and
//! the [`sandbox`] renders demos in isolated execution contexts. The [`api`]
//! module serves all of it over HTTP.

pub mod aggregator;
pub mod api;
pub mod catalog;
pub mod config;
pub mod models;
pub mod render;
pub mod sandbox;
pub mod scanner;
