//! Locating method resources on disk or in the binary.

use crate::error::{InstrumentError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resources shipped with the bundled drivers.
const EMBEDDED: &[(&str, &str)] = &[
    (
        "keithley_2450",
        include_str!("../../resources/keithley_2450.yaml"),
    ),
    ("generic_smu", include_str!("../../resources/generic_smu.yaml")),
    (
        "keysight_e5080b",
        include_str!("../../resources/keysight_e5080b.yaml"),
    ),
];

/// Text of a resource and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceText {
    /// File path, or `embedded:<name>`
    pub origin: String,
    /// Raw YAML
    pub text: String,
}

/// Finds method resources by name.
///
/// Lookup order:
/// 1. `name` itself when it points at an existing file
/// 2. each search path in the order added, trying `<name>`, `<name>.yaml`, `<name>.yml`
/// 3. resources embedded in the binary
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    /// Search paths in priority order (first = highest priority)
    search_paths: Vec<PathBuf>,
    use_embedded: bool,
}

impl ResourceLocator {
    /// Locator with no search paths that falls back to embedded resources.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            use_embedded: true,
        }
    }

    /// Adds a search path. Paths added first have higher priority.
    pub fn add_search_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.search_paths.push(path.into());
    }

    /// Builder form of [`ResourceLocator::add_search_path`].
    pub fn with_search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.add_search_path(path);
        self
    }

    /// Disable the embedded fallback
    pub fn without_embedded(mut self) -> Self {
        self.use_embedded = false;
        self
    }

    /// Configured search paths.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Names of the resources compiled into the binary.
    pub fn embedded_names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.iter().map(|(name, _)| *name)
    }

    /// Finds and reads the resource called `name`.
    pub fn locate(&self, name: &str) -> Result<ResourceText> {
        if name.trim().is_empty() {
            return Err(InstrumentError::config_load(name, "empty resource name"));
        }

        let direct = Path::new(name);
        if direct.is_file() {
            return read_file(name, direct);
        }

        for dir in &self.search_paths {
            for candidate in [
                dir.join(name),
                dir.join(format!("{name}.yaml")),
                dir.join(format!("{name}.yml")),
            ] {
                if candidate.is_file() {
                    return read_file(name, &candidate);
                }
            }
        }

        if self.use_embedded {
            if let Some((_, text)) = EMBEDDED.iter().find(|(n, _)| *n == name) {
                debug!("Using embedded method resource '{}'", name);
                return Ok(ResourceText {
                    origin: format!("embedded:{name}"),
                    text: (*text).to_string(),
                });
            }
        }

        let searched: Vec<String> = self
            .search_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Err(InstrumentError::config_load(
            name,
            format!("resource not found (searched: [{}])", searched.join(", ")),
        ))
    }
}

impl Default for ResourceLocator {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(name: &str, path: &Path) -> Result<ResourceText> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        InstrumentError::config_load(name, format!("failed to read {}: {e}", path.display()))
    })?;
    debug!("Loaded method resource '{}' from {}", name, path.display());
    Ok(ResourceText {
        origin: path.display().to_string(),
        text,
    })
}
