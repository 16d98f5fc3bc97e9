// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Hardware-definition schema and feature building.
//!
//! A hardware definition is a per-model YAML file describing the register
//! blocks the scan loop reads and the feature layout on top of them: digital
//! channels packed into registers (with their coil addresses), analog
//! channels, and named meter fields. Word order for multi-register floats is
//! part of the schema, declared per field.
//!
//! [`build_unit`] and [`build_features`] turn a definition plus the user's
//! per-feature metadata into the immutable registry the rest of the daemon
//! works with.

use serde::{Deserialize, Serialize};

use unipi_core::error::ConfigError;
use unipi_core::features::{Feature, FeatureCodec, FeatureRegistry};
use unipi_core::types::{
    BlockKind, Circuit, FeatureId, FeatureKind, RegisterBlock, TransportId, Unit, WordOrder,
};

use crate::schema::Config;

// =============================================================================
// Definition schema
// =============================================================================

/// A per-model hardware definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareDefinition {
    /// Model name (e.g. `L203`, `SDM120M`).
    pub model: String,
    /// Manufacturer, for discovery payloads.
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Register blocks the scan loop reads.
    pub modbus_register_blocks: Vec<RegisterBlockDef>,
    /// Feature layout.
    pub modbus_features: Vec<FeatureDef>,
}

/// One scannable register block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBlockDef {
    /// First register address.
    pub start_reg: u16,
    /// Number of registers.
    pub count: u16,
    /// Register table (`holding` by default).
    #[serde(default)]
    pub reg_type: RegType,
}

/// Register table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegType {
    /// Holding registers (FC 03).
    #[default]
    Holding,
    /// Input registers (FC 04).
    Input,
}

impl From<RegType> for BlockKind {
    fn from(value: RegType) -> Self {
        match value {
            RegType::Holding => BlockKind::Holding,
            RegType::Input => BlockKind::Input,
        }
    }
}

/// One feature layout entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureDef {
    /// Digital inputs.
    Di(DigitalDef),
    /// Digital outputs.
    Do(DigitalOutDef),
    /// Relay outputs.
    Ro(DigitalOutDef),
    /// User LEDs.
    Led(DigitalOutDef),
    /// Analog inputs.
    Ai(AnalogDef),
    /// Analog outputs.
    Ao(AnalogDef),
    /// A named meter field.
    Meter(MeterFieldDef),
}

/// Layout of a digital input group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DigitalDef {
    /// Number of channels.
    pub count: u16,
    /// Board slot group.
    pub major_group: u8,
    /// First value register.
    pub val_reg: u16,
    /// Register table.
    #[serde(default)]
    pub reg_type: RegType,
}

/// Layout of a digital/relay output group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DigitalOutDef {
    /// Number of channels.
    pub count: u16,
    /// Board slot group.
    pub major_group: u8,
    /// First value register.
    pub val_reg: u16,
    /// First coil address for FC 05 writes.
    #[serde(default)]
    pub val_coil: Option<u16>,
    /// Pre-packed FC 06 register value for ON (single-channel groups only).
    #[serde(default)]
    pub packed_on: Option<u16>,
    /// Pre-packed FC 06 register value for OFF (single-channel groups only).
    #[serde(default)]
    pub packed_off: Option<u16>,
    /// Register table.
    #[serde(default)]
    pub reg_type: RegType,
}

/// Layout of an analog channel group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalogDef {
    /// Number of channels.
    pub count: u16,
    /// Board slot group.
    pub major_group: u8,
    /// First value register.
    pub val_reg: u16,
    /// Registers per channel (1 = raw u16, 2 = float).
    #[serde(default = "default_analog_span")]
    pub reg_span: u16,
    /// Word order for two-register channels.
    #[serde(default)]
    pub word_order: WordOrder,
    /// Register table.
    #[serde(default)]
    pub reg_type: RegType,
}

fn default_analog_span() -> u16 {
    1
}

/// One named meter field (e.g. voltage, active power).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterFieldDef {
    /// Field name; the feature id becomes `<name>_<unit>`.
    pub name: String,
    /// First register address.
    pub start_reg: u16,
    /// Number of registers (2 for floats).
    #[serde(default = "default_meter_span")]
    pub count: u16,
    /// Word order of the float.
    #[serde(default)]
    pub word_order: WordOrder,
    /// Unit of measurement.
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    /// Decimal places for the published payload.
    #[serde(default)]
    pub precision: Option<u8>,
    /// Home Assistant device class.
    #[serde(default)]
    pub device_class: Option<String>,
    /// Home Assistant state class.
    #[serde(default)]
    pub state_class: Option<String>,
    /// Register table (`input` by default: meters expose float fields in
    /// the input table).
    #[serde(default = "default_meter_reg_type")]
    pub reg_type: RegType,
}

fn default_meter_span() -> u16 {
    2
}

fn default_meter_reg_type() -> RegType {
    RegType::Input
}

// =============================================================================
// Builders
// =============================================================================

/// Builds the [`Unit`] (register blocks) for a definition.
pub fn build_unit(
    transport: &TransportId,
    unit_id: u8,
    definition: &HardwareDefinition,
) -> Result<Unit, ConfigError> {
    let blocks = definition
        .modbus_register_blocks
        .iter()
        .map(|b| RegisterBlock::new(b.start_reg, b.count, b.reg_type.into()))
        .collect();

    let unit = Unit::new(transport.clone(), unit_id, blocks);
    unit.validate().map_err(|(a, b)| {
        ConfigError::validation(
            "modbus_register_blocks",
            format!(
                "blocks {}+{} and {}+{} overlap in the {} table",
                a.start, a.count, b.start, b.count, a.kind
            ),
        )
    })?;
    Ok(unit)
}

/// Builds and registers every feature of a definition, merging the user's
/// per-feature metadata from `config.features`.
pub fn build_features(
    transport: &TransportId,
    unit_id: u8,
    definition: &HardwareDefinition,
    config: &Config,
    registry: &mut FeatureRegistry,
) -> Result<(), ConfigError> {
    for feature_def in &definition.modbus_features {
        match feature_def {
            FeatureDef::Di(def) => {
                build_digital_inputs(transport, unit_id, def, config, registry)?;
            }
            FeatureDef::Do(def) => build_digital_outputs(
                transport,
                unit_id,
                FeatureKind::DigitalOutput,
                def,
                config,
                registry,
            )?,
            FeatureDef::Ro(def) => build_digital_outputs(
                transport,
                unit_id,
                FeatureKind::RelayOutput,
                def,
                config,
                registry,
            )?,
            FeatureDef::Led(def) => build_digital_outputs(
                transport,
                unit_id,
                FeatureKind::Led,
                def,
                config,
                registry,
            )?,
            FeatureDef::Ai(def) => build_analog(
                transport,
                unit_id,
                FeatureKind::AnalogInput,
                def,
                config,
                registry,
            )?,
            FeatureDef::Ao(def) => build_analog(
                transport,
                unit_id,
                FeatureKind::AnalogOutput,
                def,
                config,
                registry,
            )?,
            FeatureDef::Meter(def) => {
                build_meter_field(transport, unit_id, def, config, registry)?;
            }
        }
    }
    Ok(())
}

fn build_digital_inputs(
    transport: &TransportId,
    unit_id: u8,
    def: &DigitalDef,
    config: &Config,
    registry: &mut FeatureRegistry,
) -> Result<(), ConfigError> {
    for index in 0..def.count {
        let circuit = Circuit::new(def.major_group, index as u8 + 1);
        let id = circuit.feature_id(FeatureKind::DigitalInput);
        let metadata = config.feature_metadata(id.as_str());

        registry.register(Feature {
            id,
            kind: FeatureKind::DigitalInput,
            circuit: Some(circuit),
            transport: transport.clone(),
            unit: unit_id,
            block_kind: def.reg_type.into(),
            codec: FeatureCodec::Bit {
                reg: def.val_reg + index / 16,
                bit: (index % 16) as u8,
                coil: None,
                packed: None,
            },
            metadata,
        })?;
    }
    Ok(())
}

fn build_digital_outputs(
    transport: &TransportId,
    unit_id: u8,
    kind: FeatureKind,
    def: &DigitalOutDef,
    config: &Config,
    registry: &mut FeatureRegistry,
) -> Result<(), ConfigError> {
    let packed = match (def.packed_on, def.packed_off) {
        (Some(on), Some(off)) if def.count == 1 => Some((on, off)),
        (Some(_), Some(_)) => {
            return Err(ConfigError::validation(
                "modbus_features",
                "packed register values are only valid for single-channel groups",
            ));
        }
        _ => None,
    };

    if def.val_coil.is_none() && packed.is_none() {
        return Err(ConfigError::validation(
            "modbus_features",
            format!(
                "output group {}_{} declares neither val_coil nor packed values",
                kind.prefix(),
                def.major_group
            ),
        ));
    }

    for index in 0..def.count {
        let circuit = Circuit::new(def.major_group, index as u8 + 1);
        let id = circuit.feature_id(kind);
        let metadata = config.feature_metadata(id.as_str());

        registry.register(Feature {
            id,
            kind,
            circuit: Some(circuit),
            transport: transport.clone(),
            unit: unit_id,
            block_kind: def.reg_type.into(),
            codec: FeatureCodec::Bit {
                reg: def.val_reg + index / 16,
                bit: (index % 16) as u8,
                coil: def.val_coil.map(|c| c + index),
                packed,
            },
            metadata,
        })?;
    }
    Ok(())
}

fn build_analog(
    transport: &TransportId,
    unit_id: u8,
    kind: FeatureKind,
    def: &AnalogDef,
    config: &Config,
    registry: &mut FeatureRegistry,
) -> Result<(), ConfigError> {
    for index in 0..def.count {
        let circuit = Circuit::new(def.major_group, index as u8 + 1);
        let id = circuit.feature_id(kind);
        let metadata = config.feature_metadata(id.as_str());
        let reg = def.val_reg + index * def.reg_span;

        let codec = match def.reg_span {
            1 => FeatureCodec::U16 { reg },
            2 => FeatureCodec::F32 {
                reg,
                order: def.word_order,
            },
            other => {
                return Err(ConfigError::validation(
                    "modbus_features",
                    format!("unsupported analog register span {other}"),
                ));
            }
        };

        registry.register(Feature {
            id,
            kind,
            circuit: Some(circuit),
            transport: transport.clone(),
            unit: unit_id,
            block_kind: def.reg_type.into(),
            codec,
            metadata,
        })?;
    }
    Ok(())
}

fn build_meter_field(
    transport: &TransportId,
    unit_id: u8,
    def: &MeterFieldDef,
    config: &Config,
    registry: &mut FeatureRegistry,
) -> Result<(), ConfigError> {
    if def.count != 2 {
        return Err(ConfigError::validation(
            "modbus_features",
            format!("meter field '{}' must span 2 registers", def.name),
        ));
    }

    let id = FeatureId::new(format!("{}_{}", def.name, unit_id));
    let mut metadata = config.feature_metadata(id.as_str());
    // Definition-level metadata fills whatever the user left unset.
    if metadata.unit_of_measurement.is_none() {
        metadata.unit_of_measurement = def.unit_of_measurement.clone();
    }
    if metadata.precision.is_none() {
        metadata.precision = def.precision;
    }
    if metadata.device_class.is_none() {
        metadata.device_class = def.device_class.clone();
    }
    if metadata.state_class.is_none() {
        metadata.state_class = def.state_class.clone();
    }

    registry.register(Feature {
        id,
        kind: FeatureKind::MeterField,
        circuit: None,
        transport: transport.clone(),
        unit: unit_id,
        block_kind: def.reg_type.into(),
        codec: FeatureCodec::F32 {
            reg: def.start_reg,
            order: def.word_order,
        },
        metadata,
    })?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
