use std::collections::HashMap;

use serde::Deserialize;

/// Most options a platform selector can show.
pub const MAX_SELECT_OPTIONS: usize = 25;

/// Display names for location keys.
pub trait ReferenceData: Send + Sync {
    /// Display name for `key`; unknown keys are title-cased rather than rejected.
    fn name_of(&self, key: &str) -> String;
    /// Ordered `(key, display name)` pairs, truncated to [`MAX_SELECT_OPTIONS`].
    fn choices(&self) -> Vec<(String, String)>;
    fn contains(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Location {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StaticLocations {
    locations: Vec<Location>,
    by_key: HashMap<String, usize>,
}

impl StaticLocations {
    pub fn new(locations: Vec<Location>) -> Self {
        let mut by_key = HashMap::with_capacity(locations.len());
        for (idx, location) in locations.iter().enumerate() {
            by_key.entry(location.key.clone()).or_insert(idx);
        }
        Self { locations, by_key }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(key, name)| Location {
                    key: key.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl ReferenceData for StaticLocations {
    fn name_of(&self, key: &str) -> String {
        self.by_key
            .get(key)
            .map(|&idx| self.locations[idx].name.clone())
            .unwrap_or_else(|| titleize(key))
    }

    fn choices(&self) -> Vec<(String, String)> {
        self.locations
            .iter()
            .take(MAX_SELECT_OPTIONS)
            .map(|l| (l.key.clone(), l.name.clone()))
            .collect()
    }

    fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }
}

/// `"route_201"` → `"Route 201"`.
fn titleize(key: &str) -> String {
    key.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
