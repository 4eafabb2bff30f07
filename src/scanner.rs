//! Build-time discovery of catalog units.
//!
//! Every immediate subdirectory of the content root is a candidate. A candidate
//! enters the index when its manifest parses as JSON; anything else about a
//! single candidate (no manifest, unreadable manifest, malformed manifest) only
//! shrinks the index. The one fatal outcome is failing to write the index.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Manifest, UnitId};

pub const DEFAULT_MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// File name of the manifest inside each unit directory.
    pub manifest_file: String,
    /// Also require the manifest to deserialize and to name its directory.
    pub strict: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            strict: false,
        }
    }
}

/// Result of walking a content root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// The content root did not exist; `units` is empty.
    pub root_missing: bool,
    /// Included units, sorted and duplicate-free.
    pub units: Vec<UnitId>,
    /// Candidates that had a manifest but failed validation.
    pub skipped: Vec<SkippedCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    pub unit: UnitId,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read content root {}: {source}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write index {}: {source}", path.display())]
    WriteIndex {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

enum Candidate {
    Valid,
    NoManifest,
    Invalid(String),
}

/// Walk `root` and collect every unit with a valid manifest.
pub async fn scan(root: &Path, options: &ScanOptions) -> Result<ScanReport, ScanError> {
    let read_root = |source| ScanError::ReadRoot {
        path: root.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(
                "Library directory {} does not exist, creating empty list",
                root.display()
            );
            return Ok(ScanReport {
                root_missing: true,
                ..ScanReport::default()
            });
        }
        Err(e) => return Err(read_root(e)),
    };

    let mut report = ScanReport::default();

    while let Some(entry) = entries.next_entry().await.map_err(read_root)? {
        let path = entry.path();
        match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("Could not stat {}: {}", path.display(), e);
                continue;
            }
        }

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!("Skipping directory with non UTF-8 name: {}", path.display());
            continue;
        };
        let unit = match UnitId::parse(name) {
            Ok(unit) => unit,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        match inspect_candidate(&path, &unit, options).await {
            Candidate::Valid => {
                debug!(unit = %unit, "Found component");
                report.units.push(unit);
            }
            Candidate::NoManifest => {
                debug!(unit = %unit, "No {} present, not a component", options.manifest_file);
            }
            Candidate::Invalid(reason) => {
                warn!("Invalid {} in {}: {}", options.manifest_file, unit, reason);
                report.skipped.push(SkippedCandidate { unit, reason });
            }
        }
    }

    // read_dir order is platform dependent; the index order is not.
    report.units.sort();
    report.units.dedup();
    report.skipped.sort_by(|a, b| a.unit.cmp(&b.unit));

    Ok(report)
}

async fn inspect_candidate(dir: &Path, unit: &UnitId, options: &ScanOptions) -> Candidate {
    let manifest_path = dir.join(&options.manifest_file);
    let bytes = match tokio::fs::read(&manifest_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Candidate::NoManifest,
        Err(e) => return Candidate::Invalid(format!("unreadable: {e}")),
    };

    let checked = if options.strict {
        Manifest::load_for(unit, &bytes).map(|_| ())
    } else {
        Manifest::check_syntax(&bytes)
    };

    match checked {
        Ok(()) => Candidate::Valid,
        Err(e) => Candidate::Invalid(e.to_string()),
    }
}

/// Write the index as a pretty-printed JSON array of unit ids.
///
/// The file is written to a sibling temp file and renamed into place, so a
/// reader never observes a half-written index.
pub async fn write_index(units: &[UnitId], output: &Path) -> Result<(), ScanError> {
    let write_err = |source| ScanError::WriteIndex {
        path: output.to_path_buf(),
        source,
    };

    let body = serde_json::to_string_pretty(units).map_err(|e| write_err(e.into()))?;

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(write_err)?;

    let target = output.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(body.as_bytes())?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| write_err(io::Error::other(e)))?
    .map_err(write_err)
}

/// Scan `root`, write the index to `output`, and report what was included.
pub async fn scan_and_write(
    root: &Path,
    output: &Path,
    options: &ScanOptions,
) -> Result<ScanReport, ScanError> {
    let report = scan(root, options).await?;
    write_index(&report.units, output).await?;

    let names: Vec<&str> = report.units.iter().map(UnitId::as_str).collect();
    info!(
        "Generated components list with {} components: {}",
        names.len(),
        names.join(", ")
    );
    if !report.skipped.is_empty() {
        warn!("{} candidate(s) excluded by validation", report.skipped.len());
    }

    Ok(report)
}
