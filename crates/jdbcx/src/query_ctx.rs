//! Per-build query context.
//!
//! A [`QueryContext`] is the mutable scratch one expansion works with: the
//! config manager, suppliers of fresh backend and wrapped connections, the
//! variable tag, per-build variables, and the temporary connections adopted
//! during the build. Adopted connections are released when the context goes
//! away.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::ConfigManager;
use crate::driver::BackendConnection;
use crate::error::Result;
use crate::tag::VariableTag;

/// Opens one more connection on demand.
pub type ConnectionSupplier = Box<dyn Fn() -> Result<Box<dyn BackendConnection>> + Send>;

pub struct QueryContext {
    config: Arc<dyn ConfigManager>,
    connect: ConnectionSupplier,
    wrap: ConnectionSupplier,
    tag: VariableTag,
    variables: IndexMap<String, String>,
    adopted: Vec<Box<dyn BackendConnection>>,
}

impl QueryContext {
    pub fn new(
        config: Arc<dyn ConfigManager>,
        connect: ConnectionSupplier,
        wrap: ConnectionSupplier,
        tag: VariableTag,
    ) -> Self {
        QueryContext {
            config,
            connect,
            wrap,
            tag,
            variables: IndexMap::new(),
            adopted: Vec::new(),
        }
    }

    pub fn config(&self) -> &Arc<dyn ConfigManager> {
        &self.config
    }

    pub fn tag(&self) -> &VariableTag {
        &self.tag
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Opens a fresh backend connection. Ownership stays with the caller;
    /// pass it to [`QueryContext::adopt`] to scope it to this build.
    pub fn new_backend_connection(&self) -> Result<Box<dyn BackendConnection>> {
        (self.connect)()
    }

    /// Opens a fresh wrapped (expansion-aware) connection.
    pub fn new_wrapped_connection(&self) -> Result<Box<dyn BackendConnection>> {
        (self.wrap)()
    }

    /// Scopes a connection to this build; it is closed when the context is
    /// dropped.
    pub fn adopt(&mut self, conn: Box<dyn BackendConnection>) {
        self.adopted.push(conn);
    }
}

impl Drop for QueryContext {
    fn drop(&mut self) {
        for conn in self.adopted.iter_mut() {
            if conn.is_closed() {
                continue;
            }
            if let Err(e) = conn.close() {
                log::warn!("failed to close a build-scoped connection: {e}");
            }
        }
    }
}
