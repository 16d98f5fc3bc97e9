// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration and hardware-definition loading.
//!
//! The loader resolves the user configuration (`control.yaml`) and the
//! per-model hardware definitions from a hardware directory, by default
//! `/etc/unipi`. A missing user configuration falls back to defaults; a
//! missing hardware definition is fatal.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use unipi_core::error::ConfigError;

use crate::hardware::HardwareDefinition;
use crate::schema::Config;

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/unipi";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads the user configuration and hardware definitions.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a loader rooted at `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Path of the user configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("control.yaml")
    }

    /// Path of a hardware definition by name.
    pub fn definition_path(&self, name: &str) -> PathBuf {
        self.config_dir.join("hardware").join(format!("{name}.yaml"))
    }

    /// Loads and validates the user configuration.
    ///
    /// A missing file yields the default configuration; everything else is
    /// fatal.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let path = self.config_path();
        let config = if path.exists() {
            read_yaml::<Config>(&path)?
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a hardware definition by name.
    pub fn load_definition(&self, name: &str) -> Result<HardwareDefinition, ConfigError> {
        let path = self.definition_path(name);
        let definition = read_yaml::<HardwareDefinition>(&path)?;
        tracing::info!(path = %path.display(), model = %definition.model, "Hardware definition loaded");
        Ok(definition)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

/// Reads and parses one YAML file.
fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&data).map_err(|e| ConfigError::parse(path, e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let config = loader.load_config().unwrap();
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("control.yaml"),
            "device_name: test-unit\nmqtt:\n  host: broker\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path());
        let config = loader.load_config().unwrap();
        assert_eq!(config.device_name, "test-unit");
        assert_eq!(config.mqtt.host, "broker");
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("control.yaml"), "device_name: 'bad name!'\n").unwrap();

        let loader = ConfigLoader::new(dir.path());
        assert!(loader.load_config().is_err());
    }

    #[test]
    fn test_parse_error_includes_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("control.yaml"), ":\n  - not yaml").unwrap();

        let loader = ConfigLoader::new(dir.path());
        let err = loader.load_config().unwrap_err();
        assert!(err.to_string().contains("control.yaml"));
    }

    #[test]
    fn test_load_definition() {
        let dir = tempfile::tempdir().unwrap();
        let hardware = dir.path().join("hardware");
        fs::create_dir_all(&hardware).unwrap();
        fs::write(
            hardware.join("L203.yaml"),
            r#"
model: L203
modbus_register_blocks:
  - start_reg: 0
    count: 2
modbus_features:
  - type: di
    count: 4
    major_group: 1
    val_reg: 0
"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path());
        let definition = loader.load_definition("L203").unwrap();
        assert_eq!(definition.model, "L203");

        let err = loader.load_definition("missing").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
