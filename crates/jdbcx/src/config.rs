//! Named extension configurations.
//!
//! Each extension may own any number of named configurations stored as
//! `<root>/<extension>/<id>.properties`. Id patterns inside blocks are
//! glob-expanded against the ids known to the [`ConfigManager`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::options::{OPTION_CONFIG_PATH, PROPERTY_PREFIX};
use crate::properties::Properties;

/// Provider of named per-extension configurations.
pub trait ConfigManager: Send + Sync {
    /// Ids known for the given extension, in stable order.
    fn ids(&self, extension: &str) -> Vec<String>;

    /// Loads the configuration stored under the given id, if any.
    fn config(&self, extension: &str, id: &str) -> Option<Properties>;
}

/// A [`ConfigManager`] with nothing in it.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyConfigManager;

impl ConfigManager for EmptyConfigManager {
    fn ids(&self, _extension: &str) -> Vec<String> {
        Vec::new()
    }

    fn config(&self, _extension: &str, _id: &str) -> Option<Properties> {
        None
    }
}

/// File-system backed configurations under a root directory.
#[derive(Clone, Debug)]
pub struct FileConfigManager {
    root: PathBuf,
}

const PROPERTIES_SUFFIX: &str = ".properties";

impl FileConfigManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileConfigManager { root: root.into() }
    }

    /// Builds a manager rooted at the configured config path, resolving the
    /// leading `~` against the home directory.
    pub fn from_properties(props: &Properties) -> Self {
        let raw = OPTION_CONFIG_PATH.get(props);
        FileConfigManager::new(resolve_home(&raw))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_file(&self, extension: &str, id: &str) -> PathBuf {
        self.root
            .join(extension)
            .join(format!("{id}{PROPERTIES_SUFFIX}"))
    }
}

impl ConfigManager for FileConfigManager {
    fn ids(&self, extension: &str) -> Vec<String> {
        if extension.is_empty() {
            return Vec::new();
        }
        let dir = self.root.join(extension);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(PROPERTIES_SUFFIX))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }

    fn config(&self, extension: &str, id: &str) -> Option<Properties> {
        let path = self.config_file(extension, id);
        match Properties::load(&path) {
            Ok(props) => Some(props),
            Err(_) => None,
        }
    }
}

/// Loads the defaults file named by `config.path`, when it points at a file.
///
/// A directory-valued config path carries named configs only and contributes
/// no defaults.
pub fn load_defaults(props: &Properties) -> Result<Option<Properties>> {
    let raw = OPTION_CONFIG_PATH.get(props);
    let path = resolve_home(&raw);
    if !path.is_file() {
        return Ok(None);
    }
    let mut defaults = Properties::load(&path)?;
    // keep only namespaced keys; plain keys in a defaults file would leak
    // into backend connection properties
    let (namespaced, _) = defaults.partition_by_prefix();
    defaults = namespaced;
    debug_assert!(defaults.iter().all(|(k, _)| k.starts_with(PROPERTY_PREFIX)));
    Ok(Some(defaults))
}

/// Layers the supplied properties over the defaults file named by
/// `config.path`, when one exists. Everything that reads connection-level
/// options (the manager, the registry whitelist) must read this merged
/// view, not the raw per-call properties.
pub fn merge_defaults(props: &Properties) -> Result<Properties> {
    let mut merged = props.clone();
    if let Some(defaults) = load_defaults(props)? {
        merged = merged.with_parent(Arc::new(defaults));
    }
    Ok(merged)
}

fn resolve_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
