//! Server settings.
//!
//! `Config::load` starts from built-in defaults, replaces them with the YAML
//! file named by `RPCKIT_CONFIG` when that variable is set, and finally lets
//! individual `RPCKIT_*` variables win.

use rpckit_protocol::{FramerKind, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the YAML settings file.
pub const CONFIG_PATH_VAR: &str = "RPCKIT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
}

impl Config {
    /// Defaults, then the YAML file (if any), then `RPCKIT_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::read_yaml(path)?,
            Err(_) => Self::default(),
        };
        config.merge_vars(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn read_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })
    }

    pub fn write_yaml(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = serde_yaml::to_string(self).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })
    }

    /// Overrides fields from `var`, which maps a variable name to its value.
    /// Values that fail to parse leave the field untouched.
    pub fn merge_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let net = &mut self.network;
        set_parsed(&var, "RPCKIT_BIND", &mut net.bind_addr);
        set_parsed(&var, "RPCKIT_IDLE_TIMEOUT_MS", &mut net.idle_timeout_ms);
        set_parsed(&var, "RPCKIT_FRAMER", &mut net.framer);
        set_parsed(&var, "RPCKIT_MAX_CONNECTIONS", &mut net.max_connections);
        set_parsed(&var, "RPCKIT_READ_BUFFER_SIZE", &mut net.read_buffer_size);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if self.network.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be positive"));
        }
        Ok(())
    }
}

fn set_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    match var(name).map(|raw| raw.trim().parse::<T>()) {
        Some(Ok(value)) => *slot = value,
        Some(Err(_)) => tracing::warn!("Ignoring unparseable {}", name),
        None => {}
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP address `RpcServer::run` binds.
    pub bind_addr: SocketAddr,
    /// Stop serving once no client has been connected for this long; 0 disables.
    pub idle_timeout_ms: u64,
    pub framer: FramerKind,
    /// Connections beyond this are accepted and closed immediately.
    pub max_connections: usize,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_ms: 0,
            framer: FramerKind::Raw,
            max_connections: 1000,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl NetworkConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad YAML in settings file {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let defaults = Config::default();
        assert_eq!(defaults.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(defaults.network.framer, FramerKind::Raw);
        assert_eq!(defaults.network.idle_timeout(), None);
        defaults.validate().unwrap();
    }

    #[test]
    fn test_yaml_text_round_trips() {
        let mut original = Config::default();
        original.network.framer = FramerKind::Header;
        original.network.idle_timeout_ms = 250;

        let text = serde_yaml::to_string(&original).unwrap();
        assert!(text.contains("127.0.0.1:"));
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, original);
        assert_eq!(back.network.idle_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_yaml_fields_keep_defaults() {
        let parsed: Config = serde_yaml::from_str("network:\n  framer: http\n").unwrap();
        assert_eq!(parsed.network.framer, FramerKind::Http);
        assert_eq!(parsed.network.max_connections, 1000);
    }

    #[test]
    fn test_settings_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpckit.yaml");

        let mut written = Config::default();
        written.network.bind_addr = "0.0.0.0:9000".parse().unwrap();
        written.write_yaml(&path).unwrap();

        assert_eq!(Config::read_yaml(&path).unwrap(), written);
    }

    #[test]
    fn test_unreadable_file_reports_path() {
        let err = Config::read_yaml("/nonexistent/rpckit.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/rpckit.yaml"));
    }

    #[test]
    fn test_bad_yaml_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "network: [1, 2").unwrap();
        assert!(matches!(
            Config::read_yaml(&path),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn test_variables_override_fields() {
        let vars: HashMap<&str, &str> = [
            ("RPCKIT_BIND", "127.0.0.1:1234"),
            ("RPCKIT_IDLE_TIMEOUT_MS", " 100 "),
            ("RPCKIT_FRAMER", "header"),
            ("RPCKIT_MAX_CONNECTIONS", "lots"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.merge_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.network.bind_addr.port(), 1234);
        assert_eq!(config.network.idle_timeout_ms, 100);
        assert_eq!(config.network.framer, FramerKind::Header);
        assert_eq!(config.network.max_connections, 1000);
    }

    #[test]
    fn test_zero_limits_fail_validation() {
        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.network.read_buffer_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
