//! Query-rewriting connectivity shim over pluggable database drivers.
//!
//! Templates submitted through a wrapped connection may embed executable
//! blocks (`{{ ext: body }}` or `{% ext: body %}`); blocks evaluate through
//! named extensions at build time and their row results expand, by
//! Cartesian product, into the concrete queries handed to the backend.
//! Backends stay opaque behind the [`BackendDriver`] family of traits.

pub mod bridge;
pub mod config;
pub use config::{ConfigManager, EmptyConfigManager, FileConfigManager};

pub mod dialect;
pub use dialect::{find_dialect, Compression, Dialect, Format, GenericDialect};

pub mod driver;
pub use driver::{
    BackendConnection, BackendDriver, BackendStatement, ConnectionMetaData, ExecuteOutcome,
    FetchDirection, StatementAttributes,
};

pub mod error;
pub use error::{Error, Result};

pub mod extension;
pub use extension::{
    extension_name_from_url, normalize_url, DefaultExtension, DriverExtension, ExtensionRegistry,
    Listener, DEFAULT_EXTENSION_NAME,
};

pub mod manager;
pub use manager::{ConnectionManager, SharedConnection, ShimDriver};

pub mod metadata;
pub use metadata::DatabaseMetaData;

pub mod options;
pub use options::{ConfigOption, JDBCX_URL_PREFIX, JDBC_URL_PREFIX, PROPERTY_PREFIX};

pub mod parser;
pub use parser::{split, ExecutableBlock, ParsedQuery, QueryParser};

pub mod properties;
pub use properties::Properties;

pub mod query_builder;
pub use query_builder::QueryBuilder;

pub mod query_ctx;
pub use query_ctx::QueryContext;

pub mod query_result;
pub use query_result::QueryResult;

pub mod rows;
pub use rows::{Field, Row, RowStream, Rows, Schema, Value, VecOfRows};

pub mod statement;
pub use statement::{CombinedRows, WrappedConnection, WrappedStatement};

pub mod tag;
pub use tag::{substitute_variables, VariableTag};
