//! Stratified key→string configuration.
//!
//! A [`Properties`] is an ordered mapping with an optional chain of parents
//! tried in order when a key is absent, mirroring how connection properties
//! layer on top of config-file defaults.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::options::PROPERTY_PREFIX;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    entries: IndexMap<String, String>,
    parent: Option<Arc<Properties>>,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Properties {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            parent: None,
        }
    }

    /// Loads a `.properties` file. Keys are lowercased and sections, if any,
    /// are flattened away.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let map = ini::macro_safe_load(&path_str)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let mut props = Properties::new();
        for section in map.values() {
            for (key, value) in section {
                props.set(key, value.clone().unwrap_or_default());
            }
        }
        Ok(props)
    }

    /// Returns a copy of `self` whose misses fall through to `parent`.
    pub fn with_parent(mut self, parent: Arc<Properties>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Looks a key up in this layer, then along the parent chain.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.entries.get(key) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(key))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    /// Merges another layer's own entries into this one, overriding.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in other.iter() {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Number of entries in this layer (parents excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when this layer has no entries of its own.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates this layer's own entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

    /// Flattens the parent chain into a single map; children override.
    pub fn effective(&self) -> IndexMap<String, String> {
        let mut flat = match &self.parent {
            Some(p) => p.effective(),
            None => IndexMap::new(),
        };
        for (k, v) in &self.entries {
            flat.insert(k.clone(), v.clone());
        }
        flat
    }

    /// Extracts the extension-scoped sub-namespace `jdbcx.<ext>.` with the
    /// scope prefix stripped from the keys.
    pub fn scoped(&self, extension: &str) -> Properties {
        let prefix = format!("{PROPERTY_PREFIX}{extension}.");
        let mut out = Properties::new();
        for (k, v) in self.effective() {
            if let Some(stripped) = k.strip_prefix(&prefix) {
                out.set(stripped, v);
            }
        }
        out
    }

    /// Splits the effective entries into the `jdbcx.`-namespaced layer and
    /// the plain (backend-bound) layer.
    pub fn partition_by_prefix(&self) -> (Properties, Properties) {
        let mut namespaced = Properties::new();
        let mut plain = Properties::new();
        for (k, v) in self.effective() {
            if k.starts_with(PROPERTY_PREFIX) {
                namespaced.set(k, v);
            } else {
                plain.set(k, v);
            }
        }
        (namespaced, plain)
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
