//! Driver extensions and their registry.
//!
//! An extension is a named capability that evaluates a block and returns
//! rows. Extensions are described by the dyn-compatible [`DriverExtension`]
//! trait and discovered through a host-supplied list; the registry indexes
//! them lazily behind a publish-once slot.

use std::sync::{Arc, OnceLock};

use crate::config::ConfigManager;
use crate::error::Result;
use crate::options::{ConfigOption, JDBCX_URL_PREFIX, JDBC_URL_PREFIX};
use crate::query_ctx::QueryContext;
use crate::properties::Properties;
use crate::rows::{Rows, VecOfRows};

/// Evaluates one block on behalf of its extension.
pub trait Listener: Send {
    fn on_query(&mut self, query: &str) -> Result<Box<dyn Rows>>;
}

/// A named capability evaluating executable blocks.
///
/// Implementations enumerate well-known behaviors; there is no inheritance,
/// only this trait plus the registry.
pub trait DriverExtension: Send + Sync {
    /// Primary name; the registry keys on its lowercase form.
    fn name(&self) -> &str;

    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    fn description(&self) -> &str {
        ""
    }

    fn usage(&self) -> &str {
        ""
    }

    /// Options layered underneath registry defaults and block properties.
    fn default_options(&self) -> &[ConfigOption] {
        &[]
    }

    /// True when a direct query may return this extension's rows verbatim.
    fn supports_direct_query(&self) -> bool {
        false
    }

    /// True when invoking without a block body is meaningful.
    fn supports_no_arguments(&self) -> bool {
        false
    }

    /// True when the listener needs the bridge context properties.
    fn requires_bridge_context(&self) -> bool {
        false
    }

    /// Database schemas exposed through the metadata facade.
    fn db_schemas(&self, _config: &dyn ConfigManager) -> Vec<String> {
        Vec::new()
    }

    /// Tables of one schema exposed through the metadata facade.
    fn db_tables(&self, _config: &dyn ConfigManager, _schema: Option<&str>) -> Vec<String> {
        Vec::new()
    }

    fn create_listener(
        &self,
        ctx: &mut QueryContext,
        props: &Properties,
    ) -> Result<Box<dyn Listener>>;
}

/// Built-in identity extension used when a block names no extension and the
/// URL selects none: the block body comes back as a one-row result.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExtension;

pub const DEFAULT_EXTENSION_NAME: &str = "default";

impl DriverExtension for DefaultExtension {
    fn name(&self) -> &str {
        DEFAULT_EXTENSION_NAME
    }

    fn description(&self) -> &str {
        "echoes the block body as a one-row result"
    }

    fn supports_no_arguments(&self) -> bool {
        true
    }

    fn create_listener(
        &self,
        _ctx: &mut QueryContext,
        _props: &Properties,
    ) -> Result<Box<dyn Listener>> {
        Ok(Box::new(EchoListener))
    }
}

struct EchoListener;

impl Listener for EchoListener {
    fn on_query(&mut self, query: &str) -> Result<Box<dyn Rows>> {
        Ok(Box::new(VecOfRows::single("results", query)))
    }
}

struct RegistryIndex {
    admitted: Vec<Arc<dyn DriverExtension>>,
    by_name: Vec<(String, Arc<dyn DriverExtension>)>,
    by_alias: Vec<(String, Arc<dyn DriverExtension>)>,
}

/// Indexes the extensions available to one connection.
pub struct ExtensionRegistry {
    discovered: Vec<Arc<dyn DriverExtension>>,
    whitelist: Vec<String>,
    index: OnceLock<RegistryIndex>,
}

impl ExtensionRegistry {
    /// Builds a registry over the host-supplied discovery list. An empty
    /// whitelist admits every discovered extension; the built-in default
    /// extension is always admitted.
    pub fn new(discovered: Vec<Arc<dyn DriverExtension>>, whitelist: Vec<String>) -> Self {
        ExtensionRegistry {
            discovered,
            whitelist: whitelist
                .into_iter()
                .map(|n| n.trim().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
            index: OnceLock::new(),
        }
    }

    /// A registry holding only the built-in default extension.
    pub fn with_defaults() -> Self {
        ExtensionRegistry::new(vec![Arc::new(DefaultExtension)], Vec::new())
    }

    fn index(&self) -> &RegistryIndex {
        self.index.get_or_init(|| self.build_index())
    }

    fn build_index(&self) -> RegistryIndex {
        let mut admitted: Vec<Arc<dyn DriverExtension>> = Vec::new();
        for ext in &self.discovered {
            let key = ext.name().to_ascii_lowercase();
            let allowed = self.whitelist.is_empty()
                || key == DEFAULT_EXTENSION_NAME
                || self.whitelist.contains(&key);
            if allowed {
                admitted.push(ext.clone());
            } else {
                log::debug!("extension '{key}' is not whitelisted");
            }
        }
        if !admitted
            .iter()
            .any(|e| e.name().eq_ignore_ascii_case(DEFAULT_EXTENSION_NAME))
        {
            admitted.push(Arc::new(DefaultExtension));
        }

        let mut by_name: Vec<(String, Arc<dyn DriverExtension>)> = Vec::new();
        let mut by_alias: Vec<(String, Arc<dyn DriverExtension>)> = Vec::new();
        for ext in &admitted {
            let key = ext.name().to_ascii_lowercase();
            if by_name.iter().any(|(k, _)| *k == key) {
                log::warn!("duplicate extension name '{key}'; keeping the first");
                continue;
            }
            by_name.push((key, ext.clone()));
        }
        for ext in &admitted {
            for alias in ext.aliases() {
                let key = alias.to_ascii_lowercase();
                let taken = by_name.iter().any(|(k, _)| *k == key)
                    || by_alias.iter().any(|(k, _)| *k == key);
                if taken {
                    log::warn!(
                        "alias '{key}' of extension '{}' conflicts; keeping the first",
                        ext.name()
                    );
                    continue;
                }
                by_alias.push((key, ext.clone()));
            }
        }
        RegistryIndex {
            admitted,
            by_name,
            by_alias,
        }
    }

    /// Resolves an extension by exact name, then by alias.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn DriverExtension>> {
        let key = name.to_ascii_lowercase();
        let index = self.index();
        index
            .by_name
            .iter()
            .chain(index.by_alias.iter())
            .find(|(k, _)| *k == key)
            .map(|(_, ext)| ext.clone())
    }

    /// Admitted extensions, in discovery order.
    pub fn list(&self) -> Vec<Arc<dyn DriverExtension>> {
        self.index().admitted.clone()
    }

    /// The built-in default extension.
    pub fn default_extension(&self) -> Arc<dyn DriverExtension> {
        self.resolve(DEFAULT_EXTENSION_NAME)
            .unwrap_or_else(|| Arc::new(DefaultExtension))
    }

    /// Picks the default extension for a connection URL: the segment between
    /// `jdbcx:` and the next `:` proposes a name; an unresolved proposal
    /// falls back to the built-in default.
    pub fn default_for_url(&self, url: &str) -> Arc<dyn DriverExtension> {
        match extension_name_from_url(url) {
            Some(name) if !name.is_empty() => match self.resolve(name) {
                Some(ext) => ext,
                None => {
                    log::debug!("extension '{name}' from URL not found; using the default");
                    self.default_extension()
                }
            },
            _ => self.default_extension(),
        }
    }
}

/// Extension name proposed by a `jdbcx:` URL: the segment between the first
/// two colons, with any `.<id-pattern>` suffix dropped.
pub fn extension_name_from_url(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(JDBCX_URL_PREFIX)?;
    let segment = match rest.find(':') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    Some(match segment.find('.') {
        Some(pos) => &segment[..pos],
        None => segment,
    })
}

/// Rewrites a `jdbcx:` URL to the backend `jdbc:` URL by stripping the
/// extension segment; other URLs are returned unchanged.
pub fn normalize_url(url: &str) -> String {
    match url.strip_prefix(JDBCX_URL_PREFIX) {
        Some(rest) => {
            let tail = match rest.find(':') {
                Some(pos) => &rest[pos + 1..],
                None => rest,
            };
            format!("{JDBC_URL_PREFIX}{tail}")
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedExtension {
        name: &'static str,
        aliases: &'static [&'static str],
    }

    impl DriverExtension for NamedExtension {
        fn name(&self) -> &str {
            self.name
        }

        fn aliases(&self) -> Vec<String> {
            self.aliases.iter().map(|s| s.to_string()).collect()
        }

        fn create_listener(
            &self,
            _ctx: &mut QueryContext,
            _props: &Properties,
        ) -> Result<Box<dyn Listener>> {
            Ok(Box::new(EchoListener))
        }
    }

    fn ext(name: &'static str, aliases: &'static [&'static str]) -> Arc<dyn DriverExtension> {
        Arc::new(NamedExtension { name, aliases })
    }

    #[test]
    fn resolves_by_name_and_alias() {
        let registry = ExtensionRegistry::new(vec![ext("shell", &["sh", "exec"])], Vec::new());
        assert_eq!(registry.resolve("shell").unwrap().name(), "shell");
        assert_eq!(registry.resolve("SH").unwrap().name(), "shell");
        assert!(registry.resolve("python").is_none());
    }

    #[test]
    fn alias_conflicts_favor_first() {
        let registry = ExtensionRegistry::new(
            vec![ext("shell", &["run"]), ext("script", &["run"])],
            Vec::new(),
        );
        assert_eq!(registry.resolve("run").unwrap().name(), "shell");
    }

    #[test]
    fn whitelist_restricts_discovery() {
        let registry = ExtensionRegistry::new(
            vec![ext("shell", &[]), ext("script", &[])],
            vec!["script".to_string()],
        );
        assert!(registry.resolve("shell").is_none());
        assert!(registry.resolve("script").is_some());
        // the default extension is always admitted
        assert!(registry.resolve(DEFAULT_EXTENSION_NAME).is_some());
    }

    #[test]
    fn default_extension_always_available() {
        let registry = ExtensionRegistry::new(Vec::new(), Vec::new());
        assert_eq!(
            registry.default_extension().name(),
            DEFAULT_EXTENSION_NAME
        );
    }

    #[test]
    fn url_proposes_default_extension() {
        let registry = ExtensionRegistry::new(vec![ext("shell", &[])], Vec::new());
        assert_eq!(
            registry.default_for_url("jdbcx:shell:mock://db").name(),
            "shell"
        );
        assert_eq!(
            registry.default_for_url("jdbcx:unknown:mock://db").name(),
            DEFAULT_EXTENSION_NAME
        );
        assert_eq!(
            registry.default_for_url("jdbcx::mock://db").name(),
            DEFAULT_EXTENSION_NAME
        );
        assert_eq!(
            registry.default_for_url("jdbc:mock://db").name(),
            DEFAULT_EXTENSION_NAME
        );
    }

    #[test]
    fn url_segment_drops_id_pattern() {
        assert_eq!(
            extension_name_from_url("jdbcx:db.prod:mock://x"),
            Some("db")
        );
        assert_eq!(extension_name_from_url("jdbcx::mock://x"), Some(""));
        assert_eq!(extension_name_from_url("jdbc:mock://x"), None);
    }

    #[test]
    fn normalization_strips_extension_segment() {
        assert_eq!(normalize_url("jdbcx:shell:mock://db"), "jdbc:mock://db");
        assert_eq!(normalize_url("jdbcx::mock://db"), "jdbc:mock://db");
        assert_eq!(normalize_url("jdbc:mock://db"), "jdbc:mock://db");
        assert_eq!(normalize_url("mock://db"), "mock://db");
    }
}
