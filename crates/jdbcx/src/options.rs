//! Well-known configuration options.
//!
//! Every core option lives under the [`PROPERTY_PREFIX`] namespace;
//! extensions own the sub-namespace `jdbcx.<ext>.`. A [`ConfigOption`]
//! resolves its effective value from the supplied [`Properties`], the
//! prefixed namespace, the process environment, and finally its default.

use std::env;

use crate::properties::Properties;

/// Namespace prefix of all core options.
pub const PROPERTY_PREFIX: &str = "jdbcx.";

/// URL scheme handled by the shim.
pub const JDBCX_URL_PREFIX: &str = "jdbcx:";

/// URL scheme of the underlying backend.
pub const JDBC_URL_PREFIX: &str = "jdbc:";

/// Block property selecting a named configuration for an extension.
pub const KEY_ID: &str = "id";

/// Block property holding a dependent block evaluated before the owner.
pub const KEY_PRE_QUERY: &str = "preQuery";

/// Block property holding a dependent block evaluated after the owner.
pub const KEY_POST_QUERY: &str = "postQuery";

/// An immutable option descriptor.
///
/// Resolution order for the effective value: explicit key in the supplied
/// properties, then the `jdbcx.`-prefixed key, then the
/// `JDBCX_`-prefixed environment variable, then the default. A prefixed key
/// holding the empty string counts as absent.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfigOption {
    name: &'static str,
    default_value: &'static str,
    description: &'static str,
    choices: &'static [&'static str],
}

impl ConfigOption {
    pub const fn new(
        name: &'static str,
        default_value: &'static str,
        description: &'static str,
        choices: &'static [&'static str],
    ) -> Self {
        ConfigOption {
            name,
            default_value,
            description,
            choices,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> &'static str {
        self.default_value
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn choices(&self) -> &'static [&'static str] {
        self.choices
    }

    /// Fully prefixed property key, e.g. `jdbcx.server.url`.
    pub fn qualified_name(&self) -> String {
        format!("{PROPERTY_PREFIX}{}", self.name)
    }

    /// Environment variable consulted as fallback, e.g. `JDBCX_SERVER_URL`.
    pub fn env_name(&self) -> String {
        let mut s = String::with_capacity(self.name.len() + 6);
        s.push_str("JDBCX_");
        for c in self.name.chars() {
            match c {
                '.' | '-' => s.push('_'),
                _ => s.push(c.to_ascii_uppercase()),
            }
        }
        s
    }

    /// Resolves the effective value against the given properties.
    pub fn get(&self, props: &Properties) -> String {
        if let Some(v) = props.get(self.name) {
            return v;
        }
        if let Some(v) = props.get(&self.qualified_name()) {
            // An empty string under the prefixed namespace shadows nothing.
            if !v.is_empty() {
                return v;
            }
        }
        if let Ok(v) = env::var(self.env_name()) {
            if !v.is_empty() {
                return v;
            }
        }
        self.default_value.to_string()
    }

    /// Resolves the effective value and interprets it as a boolean.
    pub fn get_bool(&self, props: &Properties) -> bool {
        as_bool(&self.get(props))
    }

    /// Resolves the effective value and interprets it as milliseconds.
    pub fn get_millis(&self, props: &Properties) -> u64 {
        self.get(props).trim().parse().unwrap_or_else(|_| {
            self.default_value.trim().parse().unwrap_or(0)
        })
    }
}

pub(crate) fn as_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

const BOOL_CHOICES: &[&str] = &["true", "false"];

/// Path of a `.properties` file loaded as defaults, and the root directory
/// of named extension configs.
pub const OPTION_CONFIG_PATH: ConfigOption = ConfigOption::new(
    "config.path",
    "~/.jdbcx",
    "Path to a properties file (or directory) loaded as defaults before per-call properties",
    &[],
);

/// Extra search path used by the extension loader.
pub const OPTION_CUSTOM_CLASSPATH: ConfigOption = ConfigOption::new(
    "custom.classpath",
    "",
    "Extra search path consulted when discovering extensions",
    &[],
);

/// Comma-separated extension names admitted to the registry.
pub const OPTION_EXTENSION_WHITELIST: ConfigOption = ConfigOption::new(
    "extension.whitelist",
    "",
    "Comma-separated extension names; empty admits all discovered extensions",
    &[],
);

pub const OPTION_SERVER_URL: ConfigOption = ConfigOption::new(
    "server.url",
    "",
    "Bridge server URL; overrides host/port/context when set",
    &[],
);

pub const OPTION_SERVER_HOST: ConfigOption = ConfigOption::new(
    "server.host",
    "localhost",
    "Bridge server host",
    &[],
);

pub const OPTION_SERVER_PORT: ConfigOption = ConfigOption::new(
    "server.port",
    "8080",
    "Bridge server port",
    &[],
);

pub const OPTION_SERVER_CONTEXT: ConfigOption = ConfigOption::new(
    "server.context",
    "/",
    "Bridge server context path",
    &[],
);

pub const OPTION_SERVER_TOKEN: ConfigOption = ConfigOption::new(
    "server.token",
    "",
    "Bearer token for bridge authentication",
    &[],
);

pub const OPTION_SERVER_AUTH: ConfigOption = ConfigOption::new(
    "server.auth",
    "false",
    "Whether bridge requests carry the bearer token",
    BOOL_CHOICES,
);

pub const OPTION_SERVER_CONNECT_TIMEOUT: ConfigOption = ConfigOption::new(
    "server.timeout.connect",
    "3000",
    "Bridge HTTP connect timeout in milliseconds",
    &[],
);

pub const OPTION_SERVER_SOCKET_TIMEOUT: ConfigOption = ConfigOption::new(
    "server.timeout.socket",
    "30000",
    "Bridge HTTP read timeout in milliseconds",
    &[],
);

/// Selects the [`VariableTag`](crate::VariableTag) dialect.
pub const OPTION_TAG: ConfigOption = ConfigOption::new(
    "tag",
    "brace",
    "Variable tag used for blocks and interpolation",
    &["brace", "square"],
);

/// Returns the block's result as the query's result set without running
/// downstream SQL.
pub const OPTION_EXEC_DRYRUN: ConfigOption = ConfigOption::new(
    "exec.dryrun",
    "false",
    "Return the block result as the query result set without executing SQL",
    BOOL_CHOICES,
);

pub const OPTION_RESULT_STRING_REPLACE: ConfigOption = ConfigOption::new(
    "result.string.replace",
    "false",
    "Re-run variable substitution over each expanded cell",
    BOOL_CHOICES,
);

pub const OPTION_RESULT_STRING_TRIM: ConfigOption = ConfigOption::new(
    "result.string.trim",
    "false",
    "Trim whitespace around each expanded cell",
    BOOL_CHOICES,
);

pub const OPTION_RESULT_STRING_ESCAPE: ConfigOption = ConfigOption::new(
    "result.string.escape",
    "false",
    "Escape the target char in each expanded cell",
    BOOL_CHOICES,
);

pub const OPTION_RESULT_STRING_ESCAPE_TARGET: ConfigOption = ConfigOption::new(
    "result.string.escape.target",
    "'",
    "Character escaped in each expanded cell when escaping is on",
    &[],
);

pub const OPTION_RESULT_STRING_ESCAPE_CHAR: ConfigOption = ConfigOption::new(
    "result.string.escape.char",
    "\\",
    "Character prefixed to escaped occurrences of the target",
    &[],
);
