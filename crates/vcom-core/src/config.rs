/*!
 * Configuration management for vcom.
 *
 * This module loads, validates and shares the driver configuration: general
 * settings, logging, and the naming constants used when a virtual port is
 * published.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Global DOS-device namespace prefix for port symbolic links
pub const DEFAULT_SYMBOLIC_LINK_PREFIX: &str = "\\DosDevices\\Global\\";

/// Capacity of the symbolic link buffer, terminator included
pub const DEFAULT_SYMBOLIC_LINK_CAPACITY: usize = 32;

/// Capacity of the port name buffer, terminator included
pub const DEFAULT_PORT_NAME_CAPACITY: usize = 10;

/// Sub-key of `HARDWARE\DEVICEMAP` holding the legacy port map
pub const DEFAULT_DEVICE_MAP_SUBKEY: &str = "SERIALCOMM";

/// Hardware-key value carrying the bus-assigned port name
pub const DEFAULT_PORT_NAME_VALUE: &str = "PortName";

/// Core configuration for vcom
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Port naming and registration configuration
    #[serde(default)]
    pub port: PortConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Driver name, used in log output
    #[serde(default = "default_driver_name")]
    pub driver_name: String,

    /// Environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

/// Port naming and registration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Prefix prepended to the port name to build the symbolic link
    #[serde(default = "default_symbolic_link_prefix")]
    pub symbolic_link_prefix: String,

    /// Symbolic link buffer capacity in UTF-16 code units, terminator included
    #[serde(default = "default_symbolic_link_capacity")]
    pub symbolic_link_capacity: usize,

    /// Port name buffer capacity in UTF-16 code units, terminator included
    #[serde(default = "default_port_name_capacity")]
    pub port_name_capacity: usize,

    /// Device map sub-key used for the legacy port map
    #[serde(default = "default_device_map_subkey")]
    pub device_map_subkey: String,

    /// Name of the hardware-key value holding the port name
    #[serde(default = "default_port_name_value")]
    pub port_name_value: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            driver_name: default_driver_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            symbolic_link_prefix: default_symbolic_link_prefix(),
            symbolic_link_capacity: default_symbolic_link_capacity(),
            port_name_capacity: default_port_name_capacity(),
            device_map_subkey: default_device_map_subkey(),
            port_name_value: default_port_name_value(),
        }
    }
}

impl PortConfig {
    /// Check that the naming constants leave room for at least one
    /// character of port name.
    pub fn validate(&self) -> Result<()> {
        if self.port_name_capacity < 2 {
            return Err(Error::validation(format!(
                "port_name_capacity must be at least 2, got {}",
                self.port_name_capacity
            )));
        }

        let prefix_len = self.symbolic_link_prefix.encode_utf16().count();
        if prefix_len + 1 >= self.symbolic_link_capacity {
            return Err(Error::validation(format!(
                "symbolic link prefix ({} units) leaves no room in a buffer of {}",
                prefix_len, self.symbolic_link_capacity
            )));
        }

        if self.device_map_subkey.is_empty() {
            return Err(Error::validation("device_map_subkey must not be empty"));
        }

        if self.port_name_value.is_empty() {
            return Err(Error::validation("port_name_value must not be empty"));
        }

        Ok(())
    }
}

fn default_driver_name() -> String {
    "vcom".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

fn default_symbolic_link_prefix() -> String {
    DEFAULT_SYMBOLIC_LINK_PREFIX.to_string()
}

fn default_symbolic_link_capacity() -> usize {
    DEFAULT_SYMBOLIC_LINK_CAPACITY
}

fn default_port_name_capacity() -> usize {
    DEFAULT_PORT_NAME_CAPACITY
}

fn default_device_map_subkey() -> String {
    DEFAULT_DEVICE_MAP_SUBKEY.to_string()
}

fn default_port_name_value() -> String {
    DEFAULT_PORT_NAME_VALUE.to_string()
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let mut config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        if let Some(override_config) = self.override_with {
            config = override_config;
        }

        config.port.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.driver_name, "vcom");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.port.symbolic_link_prefix, "\\DosDevices\\Global\\");
        assert_eq!(config.port.symbolic_link_capacity, 32);
        assert_eq!(config.port.port_name_capacity, 10);
        assert_eq!(config.port.device_map_subkey, "SERIALCOMM");
        assert_eq!(config.port.port_name_value, "PortName");
        assert!(config.port.validate().is_ok());
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.driver_name, "vcom");
        assert_eq!(config.port, PortConfig::default());
    }

    #[test_log::test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("vcom.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [general]
                driver_name = "vcom-test"

                [logging]
                level = "debug"

                [port]
                symbolic_link_capacity = 40
                device_map_subkey = "SERIALCOMM_TEST"
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(&file_path).build()?;

        assert_eq!(config.general.driver_name, "vcom-test");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.port.symbolic_link_capacity, 40);
        assert_eq!(config.port.device_map_subkey, "SERIALCOMM_TEST");
        // Untouched keys keep their defaults
        assert_eq!(config.port.port_name_capacity, 10);

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() -> Result<()> {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/vcom.toml")
            .build()?;
        assert_eq!(config.port, PortConfig::default());
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("VCOMENVTEST__PORT__PORT_NAME_CAPACITY", "16");
        env::set_var("VCOMENVTEST__GENERAL__ENVIRONMENT", "production");

        let config = ConfigBuilder::new()
            .with_environment_prefix("vcomenvtest")
            .build()?;

        assert_eq!(config.port.port_name_capacity, 16);
        assert_eq!(config.general.environment, "production");

        env::remove_var("VCOMENVTEST__PORT__PORT_NAME_CAPACITY");
        env::remove_var("VCOMENVTEST__GENERAL__ENVIRONMENT");

        Ok(())
    }

    #[test]
    fn test_override_is_validated() {
        let mut config = Config::default();
        config.port.symbolic_link_capacity = 20;

        let result = ConfigBuilder::new().override_with(config).build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_port_config_validation() {
        let mut port = PortConfig::default();
        port.port_name_capacity = 1;
        assert!(port.validate().is_err());

        let mut port = PortConfig::default();
        port.device_map_subkey.clear();
        assert!(port.validate().is_err());

        let mut port = PortConfig::default();
        port.port_name_value.clear();
        assert!(port.validate().is_err());

        // 19-unit prefix plus one character plus terminator fits exactly in 21
        let mut port = PortConfig::default();
        port.symbolic_link_capacity = 21;
        assert!(port.validate().is_ok());
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.get().general.driver_name, "vcom");

        let shared2 = shared.clone();
        assert_eq!(shared2.as_ref().port.port_name_value, "PortName");
    }
}
