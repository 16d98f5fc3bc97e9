// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # unipi-config
//!
//! Configuration loading for the Unipi Control daemon:
//!
//! - **schema**: the `control.yaml` user configuration with defaults and
//!   validation
//! - **hardware**: per-model hardware definitions (register blocks, feature
//!   layout, meter fields with declared word order) and the feature builders
//! - **loader**: file resolution and YAML parsing

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod hardware;
pub mod loader;
pub mod schema;

pub use hardware::{build_features, build_unit, FeatureDef, HardwareDefinition, RegType};
pub use loader::{ConfigLoader, DEFAULT_CONFIG_DIR};
pub use schema::{
    AdvancedConfig, Config, CoverConfig, DeviceInfo, HomeAssistantConfig, LoggingConfig,
    ModbusSerialConfig, ModbusTcpConfig, MqttConfig,
};
