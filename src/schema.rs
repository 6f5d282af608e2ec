//! Transform catalogs: the bundled built-in catalog and user-supplied JSON catalogs.

use std::{
    collections::HashSet,
    path::Path,
    sync::LazyLock,
};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::warn;

use crate::compiler::OperationDescriptor;

const DEFAULT_TRANSFORMS_JSON: &str = include_str!("../assets/transforms.json");

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCatalog {
    Versioned(VersionedCatalog),
    Bare(Vec<OperationDescriptor>),
}

#[derive(Debug, Clone, Deserialize)]
struct VersionedCatalog {
    #[allow(dead_code)]
    pub version: String,
    #[serde(default)]
    pub transforms: Vec<OperationDescriptor>,
}

/// Parse a catalog document: either `{"version": .., "transforms": [..]}` or a bare array
/// of descriptors.
///
/// Only malformed JSON is an error. Entries with an unknown category or parameter type
/// are returned as-is and skipped when registered, so one bad entry never costs the rest
/// of the catalog. A repeated name is logged; the later entry replaces the earlier one.
pub fn parse_catalog(text: &str) -> Result<Vec<OperationDescriptor>> {
    let raw: RawCatalog =
        serde_json::from_str(text).map_err(|e| anyhow!("failed to parse transform catalog: {e}"))?;
    let descriptors = match raw {
        RawCatalog::Versioned(c) => c.transforms,
        RawCatalog::Bare(v) => v,
    };
    warn_duplicates(&descriptors);
    Ok(descriptors)
}

fn warn_duplicates(descriptors: &[OperationDescriptor]) {
    let mut names: HashSet<&str> = HashSet::new();
    for d in descriptors {
        if !names.insert(d.name.as_str()) {
            warn!(transform = %d.name, "duplicate transform in catalog; the later entry wins");
        }
    }
}

pub fn load_default_catalog() -> Result<Vec<OperationDescriptor>> {
    parse_catalog(DEFAULT_TRANSFORMS_JSON).context("bundled assets/transforms.json")
}

pub fn load_catalog_from_path(path: impl AsRef<Path>) -> Result<Vec<OperationDescriptor>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    parse_catalog(&text).with_context(|| format!("failed to load catalog {}", path.display()))
}

static BUILTINS: LazyLock<Vec<OperationDescriptor>> = LazyLock::new(|| {
    load_default_catalog().unwrap_or_else(|e| {
        tracing::error!("built-in transform catalog unavailable: {e:#}");
        Vec::new()
    })
});

/// Descriptors of the bundled catalog, parsed once per process.
pub fn builtin_descriptors() -> &'static [OperationDescriptor] {
    &BUILTINS
}
