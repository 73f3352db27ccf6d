//! Backend dialects.
//!
//! A [`Dialect`] describes per-product preferences: wire format,
//! compression, whether one statement may carry several result sets, and
//! the default variable tag. Dialects are resolved from the backend's
//! product string and cached process-wide in a small bounded LRU.

use core::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Error;
use crate::tag::VariableTag;

/// Wire formats a backend may accept or produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Csv,
    Tsv,
    JsonLines,
    Arrow,
}

impl Format {
    /// Binary formats require the bridge to negotiate content encoding.
    pub fn is_binary(&self) -> bool {
        matches!(self, Format::Arrow)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Csv => write!(f, "csv"),
            Format::Tsv => write!(f, "tsv"),
            Format::JsonLines => write!(f, "jsonl"),
            Format::Arrow => write!(f, "arrow"),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            "jsonl" | "ndjson" => Ok(Format::JsonLines),
            "arrow" => Ok(Format::Arrow),
            other => Err(Error::config(format!("unknown format: {other}"))),
        }
    }
}

/// Content compressions a backend may accept or produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Per-product descriptor of backend preferences. Immutable once created.
pub trait Dialect: Send + Sync {
    fn preferred_format(&self) -> Format {
        Format::Csv
    }

    fn preferred_compression(&self) -> Compression {
        Compression::None
    }

    fn supports_format(&self, format: Format) -> bool {
        format == Format::Csv
    }

    fn supports_compression(&self, compression: Compression) -> bool {
        compression == Compression::None
    }

    /// False forces the statement layer to allocate a fresh backend
    /// statement per expanded query.
    fn support_multiple_result_sets_per_statement(&self) -> bool {
        true
    }

    fn default_variable_tag(&self) -> VariableTag {
        VariableTag::BRACE
    }
}

/// The dialect assumed for products nothing is known about.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {}

#[derive(Clone, Copy)]
struct KnownDialect {
    formats: &'static [Format],
    compressions: &'static [Compression],
    preferred_format: Format,
    preferred_compression: Compression,
    multiple_result_sets: bool,
}

impl Dialect for KnownDialect {
    fn preferred_format(&self) -> Format {
        self.preferred_format
    }

    fn preferred_compression(&self) -> Compression {
        self.preferred_compression
    }

    fn supports_format(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }

    fn supports_compression(&self, compression: Compression) -> bool {
        self.compressions.contains(&compression)
    }

    fn support_multiple_result_sets_per_statement(&self) -> bool {
        self.multiple_result_sets
    }
}

/// Product-name prefixes with known preferences.
static KNOWN_DIALECTS: &[(&str, KnownDialect)] = &[
    (
        "clickhouse",
        KnownDialect {
            formats: &[Format::Csv, Format::Tsv, Format::JsonLines, Format::Arrow],
            compressions: &[Compression::None, Compression::Gzip, Compression::Zstd],
            preferred_format: Format::Arrow,
            preferred_compression: Compression::Zstd,
            multiple_result_sets: true,
        },
    ),
    (
        "postgresql",
        KnownDialect {
            formats: &[Format::Csv, Format::Tsv],
            compressions: &[Compression::None, Compression::Gzip],
            preferred_format: Format::Csv,
            preferred_compression: Compression::Gzip,
            multiple_result_sets: true,
        },
    ),
    (
        "mysql",
        KnownDialect {
            formats: &[Format::Csv, Format::Tsv],
            compressions: &[Compression::None, Compression::Gzip],
            preferred_format: Format::Csv,
            preferred_compression: Compression::Gzip,
            multiple_result_sets: true,
        },
    ),
    (
        "sqlite",
        KnownDialect {
            formats: &[Format::Csv],
            compressions: &[Compression::None],
            preferred_format: Format::Csv,
            preferred_compression: Compression::None,
            multiple_result_sets: false,
        },
    ),
    (
        "duckdb",
        KnownDialect {
            formats: &[Format::Csv, Format::JsonLines, Format::Arrow],
            compressions: &[Compression::None, Compression::Gzip, Compression::Zstd],
            preferred_format: Format::Arrow,
            preferred_compression: Compression::Zstd,
            multiple_result_sets: false,
        },
    ),
];

const DIALECT_CACHE_CAPACITY: usize = 50;

/// Resolved dialects keyed by product string, in LRU order (front oldest).
static RESOLVED_DIALECTS: LazyLock<Mutex<IndexMap<String, Arc<dyn Dialect>>>> =
    LazyLock::new(|| Mutex::new(IndexMap::new()));

/// Resolves the dialect for a product string like `ClickHouse/23.8`.
pub fn find_dialect(product: &str) -> Arc<dyn Dialect> {
    let key = product.trim().to_ascii_lowercase();
    let mut cache = RESOLVED_DIALECTS.lock();
    if let Some(dialect) = cache.shift_remove(&key) {
        // refresh recency
        cache.insert(key, dialect.clone());
        return dialect;
    }
    let dialect = resolve_dialect(&key);
    while cache.len() >= DIALECT_CACHE_CAPACITY {
        cache.shift_remove_index(0);
    }
    cache.insert(key, dialect.clone());
    dialect
}

fn resolve_dialect(product_key: &str) -> Arc<dyn Dialect> {
    for (prefix, dialect) in KNOWN_DIALECTS {
        if product_key.starts_with(prefix) {
            return Arc::new(*dialect);
        }
    }
    Arc::new(GenericDialect)
}
