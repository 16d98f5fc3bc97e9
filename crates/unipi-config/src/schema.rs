// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! User configuration schema (`control.yaml`).
//!
//! Every section carries serde defaults so a minimal file (or none at all)
//! yields a runnable configuration. [`Config::validate`] performs the checks
//! that cannot be expressed in the type system; configuration errors are
//! fatal and only possible at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use unipi_core::error::ConfigError;
use unipi_core::features::FeatureMetadata;
use unipi_covers::CoverDeviceClass;
use unipi_modbus::{Parity, StopBits};

// =============================================================================
// Config
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Device name used as the MQTT topic root. Defaults to the hostname.
    pub device_name: String,
    /// MQTT broker settings.
    pub mqtt: MqttConfig,
    /// Home Assistant discovery settings.
    pub homeassistant: HomeAssistantConfig,
    /// Modbus TCP endpoint for the Neuron coprocessors.
    pub modbus_tcp: ModbusTcpConfig,
    /// Serial RTU endpoints for attached meters.
    pub modbus_serial: Vec<ModbusSerialConfig>,
    /// Per-feature user metadata keyed by feature id.
    pub features: HashMap<String, FeatureMetadata>,
    /// Configured covers.
    pub covers: Vec<CoverConfig>,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Advanced settings.
    pub advanced: AdvancedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            mqtt: MqttConfig::default(),
            homeassistant: HomeAssistantConfig::default(),
            modbus_tcp: ModbusTcpConfig::default(),
            modbus_serial: Vec::new(),
            features: HashMap::new(),
            covers: Vec::new(),
            logging: LoggingConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unipi".to_string())
}

impl Config {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty()
            || !self
                .device_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::validation(
                "device_name",
                "only the characters A-Z a-z 0-9 - _ are allowed",
            ));
        }

        if self.mqtt.retry_limit == 0 {
            return Err(ConfigError::validation(
                "mqtt.retry_limit",
                "must be at least 1",
            ));
        }

        let mut cover_ids = Vec::new();
        let mut circuits = Vec::new();

        for (index, cover) in self.covers.iter().enumerate() {
            cover.validate(index)?;
            if cover_ids.contains(&cover.id) {
                return Err(ConfigError::validation(
                    format!("covers[{index}].id"),
                    format!("duplicate cover id '{}'", cover.id),
                ));
            }
            cover_ids.push(cover.id.clone());
            circuits.push(cover.cover_up.clone());
            circuits.push(cover.cover_down.clone());
        }

        // Driving both directions of one motor at once can destroy it, so a
        // circuit may belong to exactly one cover relay.
        for circuit in &circuits {
            if circuits.iter().filter(|c| *c == circuit).count() > 1 {
                return Err(ConfigError::validation(
                    "covers",
                    format!("circuit '{circuit}' is used by more than one cover relay"),
                ));
            }
        }

        Ok(())
    }

    /// The cover persistence directory (§ persisted state).
    pub fn tmp_dir(&self) -> PathBuf {
        if self.advanced.persistent_tmp_dir {
            PathBuf::from("/var/tmp/unipi")
        } else {
            PathBuf::from("/tmp/unipi")
        }
    }

    /// Calibration is disabled when positions survive reboots.
    pub fn calibration_enabled(&self) -> bool {
        !self.advanced.persistent_tmp_dir
    }

    /// User metadata for a feature id, if any.
    pub fn feature_metadata(&self, id: &str) -> FeatureMetadata {
        self.features.get(id).cloned().unwrap_or_default()
    }
}

// =============================================================================
// Sections
// =============================================================================

/// MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Keep-alive interval in seconds.
    pub keepalive: u64,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Reconnect attempts before the daemon gives up.
    pub retry_limit: u32,
    /// Seconds between reconnect attempts.
    pub reconnect_interval: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keepalive: 15,
            username: None,
            password: None,
            retry_limit: 30,
            reconnect_interval: 10,
        }
    }
}

impl MqttConfig {
    /// Reconnect interval as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

/// Home Assistant discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HomeAssistantConfig {
    /// Emit discovery documents on connect.
    pub enabled: bool,
    /// Discovery topic prefix.
    pub discovery_prefix: String,
    /// Device block metadata.
    pub device: DeviceInfo,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_prefix: "homeassistant".to_string(),
            device: DeviceInfo::default(),
        }
    }
}

/// Device metadata included in discovery payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceInfo {
    /// Manufacturer string.
    pub manufacturer: String,
    /// Model override; defaults to the hardware-definition model.
    pub model: Option<String>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "Unipi technology".to_string(),
            model: None,
        }
    }
}

/// Modbus TCP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModbusTcpConfig {
    /// Host of the Modbus TCP listener.
    pub host: String,
    /// Port of the Modbus TCP listener.
    pub port: u16,
    /// Unit (slave) id of the Neuron.
    pub unit: u8,
    /// Hardware-definition name (file stem under the hardware directory).
    pub device: String,
    /// Scan interval override in seconds.
    pub scan_interval: Option<f64>,
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit: 0,
            device: "neuron".to_string(),
            scan_interval: None,
        }
    }
}

/// One serial RTU endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModbusSerialConfig {
    /// Serial device path.
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Parity.
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Unit (slave) id of the attached device.
    pub unit: u8,
    /// Hardware-definition name (file stem under the hardware directory).
    pub device: String,
    /// Scan interval override in seconds.
    #[serde(default)]
    pub scan_interval: Option<f64>,
}

fn default_baud_rate() -> u32 {
    9600
}

/// One configured cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverConfig {
    /// Object id; also the MQTT topic segment.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Device class.
    pub device_class: CoverDeviceClass,
    /// Full travel time in seconds.
    pub cover_run_time: f64,
    /// Tilt swing time in seconds (blinds only).
    #[serde(default)]
    pub tilt_change_time: Option<f64>,
    /// Circuit of the relay that opens the cover.
    pub cover_up: String,
    /// Circuit of the relay that closes the cover.
    pub cover_down: String,
    /// Suggested Home Assistant area.
    #[serde(default)]
    pub suggested_area: Option<String>,
}

impl CoverConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ConfigError::validation(
                format!("covers[{index}].id"),
                "only the characters a-z 0-9 - _ are allowed",
            ));
        }
        if self.cover_run_time <= 0.0 {
            return Err(ConfigError::validation(
                format!("covers[{index}].cover_run_time"),
                "must be greater than zero",
            ));
        }
        if self.tilt_change_time.is_some_and(|t| t <= 0.0) {
            return Err(ConfigError::validation(
                format!("covers[{index}].tilt_change_time"),
                "must be greater than zero",
            ));
        }
        if self.cover_up == self.cover_down {
            return Err(ConfigError::validation(
                format!("covers[{index}]"),
                "cover_up and cover_down must be different circuits",
            ));
        }
        Ok(())
    }

    /// Travel time as a duration.
    pub fn run_time(&self) -> Duration {
        Duration::from_secs_f64(self.cover_run_time)
    }

    /// Tilt swing time as a duration, honored only for blinds.
    pub fn tilt_time(&self) -> Option<Duration> {
        self.tilt_change_time.map(Duration::from_secs_f64)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Advanced settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdvancedConfig {
    /// Persist cover positions under `/var/tmp` (survives reboots) and
    /// disable calibration mode.
    pub persistent_tmp_dir: bool,
}

// =============================================================================
// Tests
// =============================================================================
