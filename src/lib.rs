use std::path::Path;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wss_rpc::{AdapterConfig, ConfigError};

/// Path of the adapter configuration when `WSS_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "wss.json";

/// Service used when `WSS_SERVICE` is unset.
pub const DEFAULT_SERVICE: &str = "app";

/// Read and parse an adapter configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<AdapterConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    AdapterConfig::from_json(&text)
}

/// Split a comma-separated credential list, dropping empty entries.
pub fn parse_protocols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Install fmt logging filtered by `RUST_LOG`, falling back to `default`.
pub fn init_tracing(default: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "timeoutMs": 500,
                "services": {{
                    "app": {{
                        "remote": "wss://example.test/app",
                        "methods": {{ "10001": {{ "name": "ping", "parameters": [] }} }}
                    }}
                }},
                "errors": {{ "language": "en", "codes": [{{ "code": 7, "message": "insufficient funds" }}] }}
            }}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 500);
        assert!(config.services.contains_key("app"));
        assert_eq!(config.errors.message(7), Some("insufficient funds"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_parse_protocols() {
        assert_eq!(parse_protocols("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_protocols(" ").is_empty());
    }
}
