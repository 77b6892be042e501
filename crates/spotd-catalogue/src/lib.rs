//! Static instance-type catalogue loader (C1).
//!
//! Loads a JSON file of `{name, memory, cpus}` triples once at startup and
//! builds an immutable [`spotd_types::Catalogue`].

#![forbid(unsafe_code)]

use serde::Deserialize;
use spotd_types::{Catalogue, CatalogueEntry, SpotdError};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    memory: f64,
    cpus: u32,
}

/// Load the catalogue from a JSON file containing an array of
/// `{"name": ..., "memory": ..., "cpus": ...}` objects.
pub fn load_catalogue(path: &Path) -> Result<Catalogue, SpotdError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SpotdError::ConfigMissing(format!(
            "failed to read instance catalogue at '{}': {e}",
            path.display()
        ))
    })?;

    let raw: Vec<RawEntry> = serde_json::from_str(&content).map_err(|e| {
        SpotdError::ConfigMissing(format!(
            "failed to parse instance catalogue at '{}': {e}",
            path.display()
        ))
    })?;
    debug!(path = %path.display(), count = raw.len(), "read raw catalogue entries");

    let entries = raw
        .into_iter()
        .map(|r| CatalogueEntry {
            name: r.name,
            mem_gb: r.memory,
            cpus: r.cpus,
        })
        .collect::<Vec<_>>();

    let catalogue = Catalogue::from_entries(entries)?;
    info!(count = catalogue.len(), "loaded instance catalogue");
    Ok(catalogue)
}
