use genui_evaluator::{
    catalog::{DEFAULT_EXPORT_NAME, DEFAULT_REFERENCE_ID, DEFAULT_REFERENCE_PATH},
    ComponentReference, ReferenceCatalog,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_NAME: &str = "genui.config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid listen address {0}")]
    Address(String),
}

/// genui server configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Rendered updates buffered per session before the session waits
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Components generated markup may reference
    #[serde(default = "default_catalog")]
    pub catalog: Vec<CatalogEntry>,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Reference id, e.g. `__client.Counter`
    pub identifier: String,
    /// Name the markup uses for the component
    pub export_name: String,
    /// Resource the client loads the component from
    pub path: String,
    #[serde(default)]
    pub chunks: Vec<String>,
}

/// Settings for the built-in simulated generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    #[serde(default = "default_chunks")]
    pub chunks: usize,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_channel_capacity() -> usize {
    16
}

fn default_chunks() -> usize {
    5
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_catalog() -> Vec<CatalogEntry> {
    vec![CatalogEntry {
        identifier: DEFAULT_REFERENCE_ID.to_string(),
        export_name: DEFAULT_EXPORT_NAME.to_string(),
        path: DEFAULT_REFERENCE_PATH.to_string(),
        chunks: vec![],
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            channel_capacity: default_channel_capacity(),
            catalog: default_catalog(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            chunks: default_chunks(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl GeneratorConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults if the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn catalog(&self) -> ReferenceCatalog {
        self.catalog
            .iter()
            .map(|entry| {
                let mut reference = ComponentReference::new(&entry.identifier, &entry.export_name, &entry.path);
                reference.chunks = entry.chunks.clone();
                reference
            })
            .collect()
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::Address(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "port": 8080,
            "channelCapacity": 4,
            "catalog": [
                { "identifier": "__client.Chart", "exportName": "Chart", "path": "/g/chart.js", "chunks": ["c1"] }
            ],
            "generator": { "delayMs": 0 }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.channel_capacity, 4);
        assert_eq!(config.generator.chunks, 5);
        assert_eq!(config.generator.delay(), Duration::ZERO);

        let catalog = config.catalog();
        let chart = catalog.get("Chart").unwrap();
        assert_eq!(chart.id, "__client.Chart");
        assert_eq!(chart.chunks, vec!["c1"]);
        assert!(catalog.get("Counter").is_none());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.catalog(), ReferenceCatalog::with_defaults());
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/genui.config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_bad_address() {
        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(matches!(config.addr(), Err(ConfigError::Address(_))));
    }
}
