//! Configuration management for edgecomm.
//!
//! Configuration is assembled from, in order:
//! - built-in defaults
//! - an optional YAML or JSON file
//! - `EDGECOMM__*` environment variables
//! - the user-level override file `~/.edgecomm-config.json`, whose plugin
//!   search paths are appended to the configured ones

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

/// Name of the user-level override file, looked up in the home directory.
pub const USER_CONFIG_FILE_NAME: &str = ".edgecomm-config.json";

/// Name of the interface every plugin interface must itself satisfy.
pub const SUPER_INTERFACE_FILE_NAME: &str = "interface-for-interfaces.json";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommConfig {
    /// Plugin search configuration
    #[serde(default)]
    pub plugins: PluginConfig,

    /// Service directory configuration
    #[serde(default)]
    pub discovery: DirectoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CommConfig {
    /// Loads configuration from a YAML or JSON file (format chosen by
    /// extension), with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or deserialized.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Loads configuration using the `config` crate. `path` is optional;
    /// without it only defaults and environment variables apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("EDGECOMM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.map(|p| p.display().to_string()).unwrap_or_default(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Merges the user-level override file from the home directory, if any.
    pub fn merge_user_overrides(&mut self) -> Result<()> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        self.merge_user_file(home.join(USER_CONFIG_FILE_NAME))
    }

    /// Merges a user override file. Its plugin and interface search paths are
    /// appended to the current ones; everything else in it is ignored.
    ///
    /// A missing file is not an error. A malformed one is.
    pub fn merge_user_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                path = %path.display(),
                "No user defined configuration file found, continuing as usual"
            );
            return Ok(());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let user: UserOverrides =
            serde_json::from_str(&contents).map_err(|e| ConfigError::InvalidFormat {
                reason: format!(
                    "empty or malformed configuration file at '{}': {}",
                    path.display(),
                    e
                ),
            })?;

        if user.plugin_dir_paths.is_empty() {
            return Ok(());
        }

        self.plugins.dir_paths.extend(user.plugin_dir_paths);
        self.plugins
            .interface_dir_paths
            .extend(user.plugin_interface_dir_paths);
        Ok(())
    }

    /// Appends a plugin directory and an interface directory to the search
    /// paths. The super-interface file defaults to the one found in
    /// `interface_dir`.
    pub fn with_builtin_paths(mut self, plugin_dir: PathBuf, interface_dir: PathBuf) -> Self {
        if self.plugins.super_interface_file.is_none() {
            self.plugins.super_interface_file = Some(interface_dir.join(SUPER_INTERFACE_FILE_NAME));
        }
        self.plugins.dir_paths.push(plugin_dir);
        self.plugins.interface_dir_paths.push(interface_dir);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.plugins.validate()?;
        self.logging.parse_level()?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOverrides {
    #[serde(default)]
    plugin_dir_paths: Vec<PathBuf>,
    #[serde(default)]
    plugin_interface_dir_paths: Vec<PathBuf>,
}

/// Where communication plugins and their interface descriptors live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directories searched for `<plugin name>/` directories
    #[serde(default)]
    pub dir_paths: Vec<PathBuf>,

    /// Directories searched for `<interface>.json` descriptors
    #[serde(default)]
    pub interface_dir_paths: Vec<PathBuf>,

    /// Descriptor every plugin must satisfy regardless of its interface
    #[serde(default)]
    pub super_interface_file: Option<PathBuf>,

    /// Role file suffixes
    #[serde(default)]
    pub file_suffixes: FileSuffixes,
}

impl PluginConfig {
    /// Validates the plugin configuration.
    pub fn validate(&self) -> Result<()> {
        if self.file_suffixes.client.is_empty() {
            return Err(ConfigError::invalid_value(
                "plugins.file_suffixes.client",
                "suffix cannot be empty",
            )
            .into());
        }

        if self.file_suffixes.service.is_empty() {
            return Err(ConfigError::invalid_value(
                "plugins.file_suffixes.service",
                "suffix cannot be empty",
            )
            .into());
        }

        if self.file_suffixes.client == self.file_suffixes.service {
            return Err(ConfigError::invalid_value(
                "plugins.file_suffixes",
                "client and service suffixes must differ",
            )
            .into());
        }

        Ok(())
    }
}

/// File name suffixes for the client-side and service-side role files of a
/// plugin: `<name>-<suffix>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSuffixes {
    #[serde(default = "default_client_suffix")]
    pub client: String,

    #[serde(default = "default_service_suffix")]
    pub service: String,
}

fn default_client_suffix() -> String {
    "client".to_string()
}

fn default_service_suffix() -> String {
    "service".to_string()
}

impl Default for FileSuffixes {
    fn default() -> Self {
        Self {
            client: default_client_suffix(),
            service: default_service_suffix(),
        }
    }
}

/// Service directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Discovery backend to drive
    #[serde(default)]
    pub backend: DiscoveryBackendKind,

    /// DNS-SD domain
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    crate::spec::DEFAULT_DOMAIN.to_string()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackendKind::default(),
            domain: default_domain(),
        }
    }
}

/// Discovery backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryBackendKind {
    /// Multicast DNS on the local network
    #[default]
    Mdns,
    /// In-process network, for tests and single-process deployments
    Memory,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CommConfig::default();
        assert_eq!(config.plugins.file_suffixes.client, "client");
        assert_eq!(config.plugins.file_suffixes.service, "service");
        assert_eq!(config.discovery.backend, DiscoveryBackendKind::Mdns);
        assert_eq!(config.discovery.domain, "local.");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
plugins:
  dir_paths:
    - /opt/edgecomm/plugins
  file_suffixes:
    client: sub
    service: pub

discovery:
  backend: memory

logging:
  level: debug
  format: json
"#;

        let config = CommConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.plugins.dir_paths, vec![PathBuf::from("/opt/edgecomm/plugins")]);
        assert_eq!(config.plugins.file_suffixes.client, "sub");
        assert_eq!(config.discovery.backend, DiscoveryBackendKind::Memory);
        assert_eq!(config.discovery.domain, "local.");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edgecomm.yaml");
        std::fs::write(&path, "discovery:\n  backend: memory\n").unwrap();

        let config = CommConfig::from_file(&path).unwrap();
        assert_eq!(config.discovery.backend, DiscoveryBackendKind::Memory);
    }

    #[test]
    fn test_suffix_validation() {
        let mut config = CommConfig::default();
        config.plugins.file_suffixes.service = "client".to_string();
        assert!(config.validate().is_err());

        config.plugins.file_suffixes.service = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(USER_CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"pluginDirPaths": ["/home/me/plugins"], "pluginInterfaceDirPaths": ["/home/me/ifaces"]}"#,
        )
        .unwrap();

        let mut config = CommConfig::default().with_builtin_paths(
            PathBuf::from("/usr/share/edgecomm/plugins"),
            PathBuf::from("/usr/share/edgecomm/plugin-interfaces"),
        );
        config.merge_user_file(&path).unwrap();

        assert_eq!(
            config.plugins.dir_paths,
            vec![
                PathBuf::from("/usr/share/edgecomm/plugins"),
                PathBuf::from("/home/me/plugins")
            ]
        );
        assert_eq!(config.plugins.interface_dir_paths.len(), 2);
        assert_eq!(
            config.plugins.super_interface_file,
            Some(PathBuf::from(
                "/usr/share/edgecomm/plugin-interfaces/interface-for-interfaces.json"
            ))
        );
    }

    #[test]
    fn test_merge_missing_and_malformed_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CommConfig::default();

        assert!(config.merge_user_file(dir.path().join("absent.json")).is_ok());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(config.merge_user_file(&path).is_err());
    }

    #[test]
    fn test_logging_parse_level() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert!(logging.parse_level().is_ok());

        let invalid = LoggingConfig {
            level: "invalid".to_string(),
            ..Default::default()
        };
        assert!(invalid.parse_level().is_err());
    }
}
