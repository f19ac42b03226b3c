//! Proxy configuration.
//!
//! Two layers: `Properties`, the flat string map handed to
//! `initialize` (and on to the backend), and `ProxyConfig`, the typed settings
//! used to assemble a proxy and its telemetry sink.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sink::{FileSink, NoopSink, TelemetrySink, TracingSink};

/// Property enabling call-context capture on boundary reads and selected
/// filesystem calls.
pub const DIAGNOSTICS_KEY: &str = "iotrace.diagnostics";

/// Property overriding the node address recorded in telemetry.
pub const NODE_ADDRESS_KEY: &str = "iotrace.node_address";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Flat key/value configuration with dotted keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML, flattening nested tables into dotted keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse()?;
        let mut props = Self::new();
        flatten_into(&mut props.entries, "", &toml::Value::Table(table));
        Ok(props)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Boolean lookup; missing or unparsable values yield `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_str(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, inner) in table {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(out, &full, inner);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Which sink receives telemetry lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Emit through `tracing` on the telemetry target.
    #[default]
    Tracing,
    /// Append to `telemetry_path`.
    File,
    /// Discard.
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Capture call context on boundary reads.
    #[serde(default)]
    pub diagnostics: bool,

    /// Node address to record instead of the resolved local address.
    #[serde(default)]
    pub node_address: Option<String>,

    #[serde(default)]
    pub sink: SinkKind,

    /// Destination for `SinkKind::File`.
    #[serde(default)]
    pub telemetry_path: Option<PathBuf>,

    /// Extra properties forwarded to the backend on `initialize`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ProxyConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "Proxy config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink == SinkKind::File && self.telemetry_path.is_none() {
            return Err(ConfigError::Invalid(
                "file sink requires telemetry_path".to_string(),
            ));
        }
        Ok(())
    }

    /// Properties to pass to `initialize`, with the typed settings folded in.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        for (k, v) in &self.properties {
            props.set(k.clone(), v);
        }
        props.set(DIAGNOSTICS_KEY, self.diagnostics);
        if let Some(ref node) = self.node_address {
            props.set(NODE_ADDRESS_KEY, node);
        }
        props
    }

    pub fn build_sink(&self) -> Result<Arc<dyn TelemetrySink>, ConfigError> {
        self.validate()?;
        let sink: Arc<dyn TelemetrySink> = match self.sink {
            SinkKind::Tracing => Arc::new(TracingSink::new()),
            SinkKind::None => Arc::new(NoopSink::new()),
            SinkKind::File => {
                let path = self.telemetry_path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("file sink requires telemetry_path".to_string())
                })?;
                Arc::new(FileSink::open(path)?)
            }
        };
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_flatten() {
        let props = Properties::from_toml_str(
            r#"
            [iotrace]
            diagnostics = true
            node_address = "10.0.0.7"

            [backend.s3]
            retries = 3
            "#,
        )
        .unwrap();

        assert!(props.get_bool(DIAGNOSTICS_KEY, false));
        assert_eq!(props.get_str(NODE_ADDRESS_KEY), Some("10.0.0.7"));
        assert_eq!(props.get_str("backend.s3.retries"), Some("3"));
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn test_get_bool_default_and_garbage() {
        let mut props = Properties::new();
        assert!(!props.get_bool(DIAGNOSTICS_KEY, false));
        props.set(DIAGNOSTICS_KEY, "yes please");
        assert!(props.get_bool(DIAGNOSTICS_KEY, true));
        props.set(DIAGNOSTICS_KEY, " TRUE ");
        assert!(props.get_bool(DIAGNOSTICS_KEY, false));
    }

    #[test]
    fn test_proxy_config_defaults() {
        let cfg = ProxyConfig::from_toml_str("").unwrap();
        assert!(!cfg.diagnostics);
        assert_eq!(cfg.sink, SinkKind::Tracing);
        assert!(cfg.node_address.is_none());
    }

    #[test]
    fn test_proxy_config_file_sink_requires_path() {
        let err = ProxyConfig::from_toml_str(r#"sink = "file""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_proxy_config_to_properties() {
        let cfg = ProxyConfig::from_toml_str(
            r#"
            diagnostics = true
            node_address = "n9"

            [properties]
            "fs.s3.endpoint" = "http://localhost:9000"
            "#,
        )
        .unwrap();
        let props = cfg.to_properties();
        assert!(props.get_bool(DIAGNOSTICS_KEY, false));
        assert_eq!(props.get_str(NODE_ADDRESS_KEY), Some("n9"));
        assert_eq!(props.get_str("fs.s3.endpoint"), Some("http://localhost:9000"));
    }

    #[test]
    fn test_build_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ProxyConfig {
            sink: SinkKind::File,
            telemetry_path: Some(dir.path().join("telemetry.log")),
            ..Default::default()
        };
        let sink = cfg.build_sink().unwrap();
        sink.append_line("FileSystemProxy iotrace_1,n,/a,open,1,2");
        assert!(dir.path().join("telemetry.log").exists());
    }
}
