//! Per-connection context.
//!
//! A [`ConnectionManager`] owns the primary backend connection, the
//! extension registry, the effective default extension, the layered
//! connection properties, the lazily cached metadata/dialect/bridge
//! context, and every child connection created during expansion. Statements
//! hold a non-owning handle to their manager; teardown traverses downward
//! only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::bridge::{self, KEY_BRIDGE_TOKEN, KEY_BRIDGE_URL, KEY_PRODUCT, KEY_USER};
use crate::config::{self, ConfigManager};
use crate::dialect::{find_dialect, Dialect};
use crate::driver::{BackendConnection, BackendDriver, BackendStatement, ConnectionMetaData};
use crate::error::{Error, Result};
use crate::extension::{normalize_url, DriverExtension, ExtensionRegistry};
use crate::options::{
    JDBCX_URL_PREFIX, OPTION_CUSTOM_CLASSPATH, OPTION_EXTENSION_WHITELIST, OPTION_SERVER_AUTH,
    OPTION_SERVER_CONNECT_TIMEOUT, OPTION_SERVER_SOCKET_TIMEOUT, OPTION_SERVER_TOKEN, OPTION_TAG,
};
use crate::properties::Properties;
use crate::query_ctx::{ConnectionSupplier, QueryContext};
use crate::statement::WrappedConnection;
use crate::tag::VariableTag;

/// A child connection enlisted on its manager. Cloning shares the handle;
/// the manager closes every child on teardown, and closing twice is a
/// no-op.
#[derive(Clone)]
pub struct SharedConnection(Arc<Mutex<Box<dyn BackendConnection>>>);

impl SharedConnection {
    pub fn new(conn: Box<dyn BackendConnection>) -> Self {
        SharedConnection(Arc::new(Mutex::new(conn)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn BackendConnection>> {
        self.0.lock()
    }

    pub fn close(&self) -> Result<()> {
        let mut conn = self.0.lock();
        if conn.is_closed() {
            return Ok(());
        }
        conn.close()
    }
}

pub struct ConnectionManager {
    driver: Arc<dyn BackendDriver>,
    registry: Arc<ExtensionRegistry>,
    config: Arc<dyn ConfigManager>,
    url: String,
    backend_url: String,
    default_extension: Arc<dyn DriverExtension>,
    tag: VariableTag,
    /// Everything supplied at connect time, over config-file defaults.
    original_props: Arc<Properties>,
    /// The `jdbcx.`-namespaced layer.
    extension_props: Properties,
    /// Plain keys handed to the backend driver.
    backend_props: Properties,
    custom_classpath: Option<String>,
    backend: Mutex<Box<dyn BackendConnection>>,
    metadata: OnceLock<ConnectionMetaData>,
    dialect: OnceLock<Arc<dyn Dialect>>,
    bridge_context: OnceLock<Properties>,
    children: Mutex<Vec<SharedConnection>>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Connects to the backend named by the URL and assembles the
    /// per-connection context around it. Config-file defaults load
    /// underneath the supplied properties first.
    pub fn try_new(
        driver: Arc<dyn BackendDriver>,
        registry: Arc<ExtensionRegistry>,
        config: Arc<dyn ConfigManager>,
        url: &str,
        props: &Properties,
    ) -> Result<Self> {
        let merged = config::merge_defaults(props)?;
        Self::with_merged_props(driver, registry, config, url, merged)
    }

    /// Assembles the manager over properties that already carry the
    /// config-file defaults.
    fn with_merged_props(
        driver: Arc<dyn BackendDriver>,
        registry: Arc<ExtensionRegistry>,
        config: Arc<dyn ConfigManager>,
        url: &str,
        merged: Properties,
    ) -> Result<Self> {
        let original_props = Arc::new(merged);
        let (extension_props, backend_props) = original_props.partition_by_prefix();
        let tag: VariableTag = OPTION_TAG.get(&original_props).parse()?;
        let custom_classpath = {
            let path = OPTION_CUSTOM_CLASSPATH.get(&original_props);
            (!path.is_empty()).then_some(path)
        };
        let default_extension = registry.default_for_url(url);
        let backend_url = normalize_url(url);
        let backend = driver.connect(&backend_url, &backend_props)?;
        Ok(ConnectionManager {
            driver,
            registry,
            config,
            url: url.to_string(),
            backend_url,
            default_extension,
            tag,
            original_props,
            extension_props,
            backend_props,
            custom_classpath,
            backend: Mutex::new(backend),
            metadata: OnceLock::new(),
            dialect: OnceLock::new(),
            bridge_context: OnceLock::new(),
            children: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Arc<dyn ConfigManager> {
        &self.config
    }

    pub fn default_extension(&self) -> Arc<dyn DriverExtension> {
        self.default_extension.clone()
    }

    pub fn tag(&self) -> VariableTag {
        self.tag
    }

    /// The `jdbcx.`-namespaced property layer.
    pub fn extension_props(&self) -> &Properties {
        &self.extension_props
    }

    /// Plain properties handed to the backend driver on connect.
    pub fn backend_props(&self) -> &Properties {
        &self.backend_props
    }

    pub fn custom_classpath(&self) -> Option<&str> {
        self.custom_classpath.as_deref()
    }

    /// Copy of the extension-scoped layer for `extension`, with the
    /// original merged properties as parent.
    pub fn extract_properties(&self, extension: &str) -> Properties {
        self.original_props
            .scoped(extension)
            .with_parent(self.original_props.clone())
    }

    /// Opens one more connection following the URL rules: a `jdbcx:` URL
    /// wraps again through the registry, anything else goes to the backend
    /// driver directly. The connection is enlisted as a child resource.
    pub fn create_connection(&self) -> Result<SharedConnection> {
        let conn: Box<dyn BackendConnection> = if self.url.starts_with(JDBCX_URL_PREFIX) {
            let manager = ConnectionManager::with_merged_props(
                self.driver.clone(),
                self.registry.clone(),
                self.config.clone(),
                &self.url,
                (*self.original_props).clone(),
            )?;
            Box::new(WrappedConnection::new(Arc::new(manager)))
        } else {
            self.driver.connect(&self.backend_url, &self.backend_props)?
        };
        let shared = SharedConnection::new(conn);
        self.children.lock().push(shared.clone());
        Ok(shared)
    }

    /// A fresh per-build context with connection suppliers bound to this
    /// manager's driver and URLs.
    pub fn create_context(&self) -> QueryContext {
        let connect: ConnectionSupplier = {
            let driver = self.driver.clone();
            let url = self.backend_url.clone();
            let props = self.backend_props.clone();
            Box::new(move || driver.connect(&url, &props))
        };
        let wrap: ConnectionSupplier = {
            let driver = self.driver.clone();
            let registry = self.registry.clone();
            let config = self.config.clone();
            let url = self.url.clone();
            let props = (*self.original_props).clone();
            Box::new(move || {
                let manager = ConnectionManager::with_merged_props(
                    driver.clone(),
                    registry.clone(),
                    config.clone(),
                    &url,
                    props.clone(),
                )?;
                Ok(Box::new(WrappedConnection::new(Arc::new(manager)))
                    as Box<dyn BackendConnection>)
            })
        };
        QueryContext::new(self.config.clone(), connect, wrap, self.tag)
    }

    /// Allocates a statement on the primary backend connection.
    pub fn new_backend_statement(&self) -> Result<Box<dyn BackendStatement>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::resource("connection already closed"));
        }
        self.backend.lock().create_statement()
    }

    /// Lazily cached metadata snapshot; a driver failure falls back to a
    /// snapshot bearing only the driver package.
    pub fn get_metadata(&self) -> ConnectionMetaData {
        self.metadata
            .get_or_init(|| match self.backend.lock().metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    log::warn!(
                        "connection metadata unavailable: {e}; using the driver package only"
                    );
                    ConnectionMetaData::package_only(self.driver.name())
                }
            })
            .clone()
    }

    /// The dialect resolved from the cached metadata's product string.
    pub fn get_dialect(&self) -> Arc<dyn Dialect> {
        self.dialect
            .get_or_init(|| find_dialect(&self.get_metadata().product()))
            .clone()
    }

    /// Bridge context properties, fetched once per manager from
    /// `<bridge_url>/config` and augmented with the URL, the encoded bearer
    /// token, the product string and the user name. A fetch failure leaves
    /// just the bridge URL.
    pub fn get_bridge_context(&self) -> Properties {
        self.bridge_context
            .get_or_init(|| {
                let base_url = bridge::server_url(&self.original_props);
                let connect_timeout = Duration::from_millis(
                    OPTION_SERVER_CONNECT_TIMEOUT.get_millis(&self.original_props),
                );
                let socket_timeout = Duration::from_millis(
                    OPTION_SERVER_SOCKET_TIMEOUT.get_millis(&self.original_props),
                );
                match bridge::fetch_bridge_config(&base_url, connect_timeout, socket_timeout) {
                    Ok(mut props) => {
                        props.set(KEY_BRIDGE_URL, &base_url);
                        let token = OPTION_SERVER_TOKEN.get(&self.original_props);
                        if OPTION_SERVER_AUTH.get_bool(&self.original_props) && !token.is_empty() {
                            props.set(KEY_BRIDGE_TOKEN, bridge::encode_token(&token));
                        }
                        let meta = self.get_metadata();
                        props.set(KEY_PRODUCT, meta.product());
                        if !meta.user_name.is_empty() {
                            props.set(KEY_USER, &meta.user_name);
                        }
                        props
                    }
                    Err(e) => {
                        log::warn!("bridge context unavailable: {e}");
                        let mut props = Properties::new();
                        props.set(KEY_BRIDGE_URL, &base_url);
                        props
                    }
                }
            })
            .clone()
    }

    /// Cancels whatever runs on the primary connection.
    pub fn cancel(&self) -> Result<()> {
        self.backend.lock().cancel()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes every child best-effort, then the primary connection.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let children: Vec<SharedConnection> = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Err(e) = child.close() {
                log::warn!("failed to close a child connection: {e}");
            }
        }
        let mut backend = self.backend.lock();
        if backend.is_closed() {
            return Ok(());
        }
        backend
            .close()
            .map_err(|e| Error::resource(format!("closing the primary connection: {e}")))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close the connection manager: {e}");
        }
    }
}

/// A [`BackendDriver`] accepting `jdbcx:` URLs and producing expansion-aware
/// wrapped connections; anything else goes to the underlying backend driver
/// untouched.
pub struct ShimDriver {
    backend: Arc<dyn BackendDriver>,
    extensions: Vec<Arc<dyn DriverExtension>>,
    config: Arc<dyn ConfigManager>,
}

impl ShimDriver {
    pub fn new(
        backend: Arc<dyn BackendDriver>,
        extensions: Vec<Arc<dyn DriverExtension>>,
        config: Arc<dyn ConfigManager>,
    ) -> Self {
        ShimDriver {
            backend,
            extensions,
            config,
        }
    }
}

impl BackendDriver for ShimDriver {
    fn name(&self) -> &str {
        "jdbcx"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(JDBCX_URL_PREFIX) || self.backend.accepts_url(url)
    }

    fn connect(&self, url: &str, props: &Properties) -> Result<Box<dyn BackendConnection>> {
        if !url.starts_with(JDBCX_URL_PREFIX) {
            return self.backend.connect(url, props);
        }
        // the whitelist must see config-file defaults, so merge before the
        // registry is built
        let merged = config::merge_defaults(props)?;
        let registry = Arc::new(ExtensionRegistry::new(
            self.extensions.clone(),
            whitelist_from(&merged),
        ));
        let manager = ConnectionManager::with_merged_props(
            self.backend.clone(),
            registry,
            self.config.clone(),
            url,
            merged,
        )?;
        Ok(Box::new(WrappedConnection::new(Arc::new(manager))))
    }
}

/// Comma-separated whitelist names from the effective properties.
fn whitelist_from(props: &Properties) -> Vec<String> {
    OPTION_EXTENSION_WHITELIST
        .get(props)
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}
