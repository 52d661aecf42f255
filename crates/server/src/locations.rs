use std::{collections::HashSet, fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use tracker_core::{Location, StaticLocations};

#[derive(Debug, Deserialize)]
struct LocationsFile {
    #[serde(default)]
    locations: Vec<Location>,
}

/// Reads the `[[locations]]` catalog. Keys must be unique; order is the selector order.
pub fn load_locations(path: &Path) -> anyhow::Result<StaticLocations> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read locations file '{}'", path.display()))?;
    parse_locations(&raw).with_context(|| format!("invalid locations file '{}'", path.display()))
}

pub(crate) fn parse_locations(raw: &str) -> anyhow::Result<StaticLocations> {
    let file: LocationsFile = toml::from_str(raw)?;
    let mut seen = HashSet::new();
    for location in &file.locations {
        if location.key.trim().is_empty() {
            bail!("location with name '{}' has an empty key", location.name);
        }
        if !seen.insert(location.key.as_str()) {
            bail!("duplicate location key '{}'", location.key);
        }
    }
    Ok(StaticLocations::new(file.locations))
}

#[cfg(test)]
#[path = "tests/locations_tests.rs"]
mod tests;
