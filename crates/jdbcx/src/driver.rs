//! Backend driver surface.
//!
//! The core never speaks a wire protocol; it consumes backends through the
//! dyn-compatible [`BackendDriver`], [`BackendConnection`] and
//! [`BackendStatement`] traits. Hosts plug real drivers in behind these
//! traits; tests plug mocks in the same way.

use core::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::properties::Properties;
use crate::rows::Rows;

/// Immutable snapshot of what a backend reports about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConnectionMetaData {
    pub package_name: String,
    pub product_name: String,
    pub product_version: String,
    pub driver_name: String,
    pub driver_version: String,
    pub user_name: String,
    pub url: String,
}

impl ConnectionMetaData {
    /// Fallback snapshot carrying only the driver's package name.
    pub fn package_only(package_name: impl Into<String>) -> Self {
        ConnectionMetaData {
            package_name: package_name.into(),
            ..ConnectionMetaData::default()
        }
    }

    /// Product string: `name/version` when both are present, else the name,
    /// else the package name.
    pub fn product(&self) -> String {
        if !self.product_name.is_empty() && !self.product_version.is_empty() {
            format!("{}/{}", self.product_name, self.product_version)
        } else if !self.product_name.is_empty() {
            self.product_name.clone()
        } else {
            self.package_name.clone()
        }
    }
}

/// Statement cursor direction, carried verbatim between statements.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FetchDirection {
    #[default]
    Forward,
    Reverse,
    Unknown,
}

/// Attributes copied from the originating statement onto per-query
/// statements when a dialect forbids multiple result sets per statement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatementAttributes {
    pub fetch_direction: FetchDirection,
    pub fetch_size: u64,
    pub max_field_size: u64,
    pub query_timeout: Option<Duration>,
    pub max_rows: u64,
    pub large_max_rows: u64,
}

/// Outcome of a generic execute: either rows or an affected-row count.
pub enum ExecuteOutcome {
    RowSet(Box<dyn Rows>),
    UpdateCount(i64),
}

impl fmt::Debug for ExecuteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteOutcome::RowSet(rows) => {
                write!(f, "RowSet({} columns)", rows.schema().num_columns())
            }
            ExecuteOutcome::UpdateCount(n) => write!(f, "UpdateCount({n})"),
        }
    }
}

/// Opens backend connections for URLs it accepts.
pub trait BackendDriver: Send + Sync {
    /// Short identifier used in diagnostics and fallback metadata.
    fn name(&self) -> &str;

    fn accepts_url(&self, url: &str) -> bool;

    fn connect(&self, url: &str, props: &Properties) -> Result<Box<dyn BackendConnection>>;
}

/// A single logical connection to a backend.
pub trait BackendConnection: Send {
    fn create_statement(&mut self) -> Result<Box<dyn BackendStatement>>;

    fn metadata(&self) -> Result<ConnectionMetaData>;

    /// Cancel the in-progress operation, if any.
    fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// [Debug](std::fmt::Debug) implementation for BackendConnection.
    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn BackendConnection")
    }
}

impl fmt::Debug for dyn BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug_fmt(f)
    }
}

/// A statement bound to one backend connection.
pub trait BackendStatement: Send {
    /// Executes a query that may produce rows or an update count.
    fn execute(&mut self, sql: &str) -> Result<ExecuteOutcome>;

    /// Executes a query expected to produce rows.
    fn execute_query(&mut self, sql: &str) -> Result<Box<dyn Rows>>;

    /// Executes a query expected to produce an update count.
    fn execute_update(&mut self, sql: &str) -> Result<i64>;

    fn add_batch(&mut self, sql: &str) -> Result<()>;

    /// Keys generated by the last execute, if the backend reports them.
    fn generated_keys(&mut self) -> Result<Option<Box<dyn Rows>>> {
        Ok(None)
    }

    fn attributes(&self) -> StatementAttributes;

    fn set_attributes(&mut self, attrs: StatementAttributes) -> Result<()>;

    fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;

    /// [Debug](std::fmt::Debug) implementation for BackendStatement.
    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn BackendStatement")
    }
}

impl fmt::Debug for dyn BackendStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.debug_fmt(f)
    }
}
