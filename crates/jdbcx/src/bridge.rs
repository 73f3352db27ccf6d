//! Bridge server context.
//!
//! Blocks using the reserved keywords are rewritten by the expansion engine
//! to target the bridge extension; this module owns the reserved names, the
//! context property keys, and the `/config` fetch that seeds the context.
//! The bridge HTTP client itself lives in the bridge extension, outside the
//! core.

use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};

use crate::error::{Error, Result};
use crate::options::{
    OPTION_SERVER_CONTEXT, OPTION_SERVER_HOST, OPTION_SERVER_PORT, OPTION_SERVER_URL,
};
use crate::properties::Properties;

/// Reserved block keyword routing a federated table query to the bridge.
pub const KEYWORD_TABLE: &str = "table";

/// Reserved block keyword routing an inline values query to the bridge.
pub const KEYWORD_VALUES: &str = "values";

/// Name of the extension that rewritten bridge blocks resolve to.
pub const BRIDGE_EXTENSION: &str = "bridge";

pub const KEY_BRIDGE_URL: &str = "bridge.url";
pub const KEY_BRIDGE_TOKEN: &str = "bridge.token";
pub const KEY_BRIDGE_PATH: &str = "bridge.path";
pub const KEY_BRIDGE_FORMAT: &str = "bridge.format";
pub const KEY_PRODUCT: &str = "product";
pub const KEY_USER: &str = "user";

/// Query-mode path prefix for synchronous one-shot evaluation.
pub const PATH_DIRECT: &str = "direct/";

/// Query-mode path prefix for asynchronous table evaluation.
pub const PATH_ASYNC: &str = "async/";

/// Composes the bridge server URL from the effective properties:
/// `server.url` wins, otherwise host/port/context are assembled.
pub fn server_url(props: &Properties) -> String {
    let explicit = OPTION_SERVER_URL.get(props);
    if !explicit.is_empty() {
        return explicit.trim_end_matches('/').to_string();
    }
    let host = OPTION_SERVER_HOST.get(props);
    let port = OPTION_SERVER_PORT.get(props);
    let mut context = OPTION_SERVER_CONTEXT.get(props);
    if !context.starts_with('/') {
        context.insert(0, '/');
    }
    format!("http://{host}:{port}{context}")
        .trim_end_matches('/')
        .to_string()
}

/// Base64 form of the bearer token handed to the bridge extension.
pub fn encode_token(token: &str) -> String {
    BASE64_STANDARD.encode(token.as_bytes())
}

/// Fetches `<base_url>/config` and parses the response as properties text.
pub fn fetch_bridge_config(
    base_url: &str,
    connect_timeout: Duration,
    socket_timeout: Duration,
) -> Result<Properties> {
    url::Url::parse(base_url)
        .map_err(|e| Error::config(format!("invalid bridge URL '{base_url}': {e}")))?;
    let config_url = format!("{}/config", base_url.trim_end_matches('/'));
    let http_config = ureq::Agent::config_builder()
        .timeout_connect(Some(connect_timeout))
        .timeout_global(Some(socket_timeout))
        .build();
    let agent = ureq::Agent::new_with_config(http_config);
    let mut response = agent
        .get(&config_url)
        .call()
        .map_err(|e| Error::config(format!("bridge config request to {config_url} failed: {e}")))?;
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| Error::config(format!("cannot read bridge config from {config_url}: {e}")))?;
    Ok(parse_properties_text(&body))
}

/// Parses `key=value` lines; `#` and `!` start comments.
pub fn parse_properties_text(text: &str) -> Properties {
    let mut props = Properties::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.set(key.trim(), value.trim());
        }
    }
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_server_url_wins() {
        let props = Properties::from_pairs([("jdbcx.server.url", "https://bridge.example/api/")]);
        assert_eq!(server_url(&props), "https://bridge.example/api");
    }

    #[test]
    fn server_url_composes_from_parts() {
        let props = Properties::from_pairs([
            ("jdbcx.server.host", "bridge.internal"),
            ("jdbcx.server.port", "9090"),
            ("jdbcx.server.context", "ctx/"),
        ]);
        assert_eq!(server_url(&props), "http://bridge.internal:9090/ctx");
    }

    #[test]
    fn default_server_url() {
        assert_eq!(server_url(&Properties::new()), "http://localhost:8080");
    }

    #[test]
    fn properties_text_skips_comments() {
        let props = parse_properties_text("# comment\nproduct=mockdb/1.0\n! note\n\nuser=alice\n");
        assert_eq!(props.get("product").as_deref(), Some("mockdb/1.0"));
        assert_eq!(props.get("user").as_deref(), Some("alice"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn token_is_base64_encoded() {
        assert_eq!(encode_token("secret"), "c2VjcmV0");
    }

    #[test]
    fn fetch_reads_remote_config() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/config")
            .with_status(200)
            .with_body("product=bridge/2.0\n")
            .create();
        let props = fetch_bridge_config(
            &server.url(),
            Duration::from_millis(3000),
            Duration::from_millis(3000),
        )
        .unwrap();
        assert_eq!(props.get("product").as_deref(), Some("bridge/2.0"));
    }

    #[test]
    fn fetch_fails_on_unreachable_server() {
        let err = fetch_bridge_config(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
