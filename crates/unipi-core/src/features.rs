// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Feature registry and register codecs.
//!
//! A [`Feature`] is a typed view over one or more consecutive registers of a
//! unit: digital bits, analog channels and meter fields. The registry is
//! built once at startup from the hardware definition merged with user
//! metadata and is immutable thereafter.
//!
//! Write encoding policy for digital outputs: a bit flagged as a coil in the
//! hardware definition is written with FC 05. Anything else is written with
//! FC 06 using a register value the hardware definition pre-packed for the
//! ON and OFF states. There is deliberately no read-modify-write path; it
//! would race against concurrent scans on the same register.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::RegisterCache;
use crate::command::PendingCommand;
use crate::error::{CommandError, ConfigError};
use crate::types::{
    BlockKind, Circuit, FeatureId, FeatureKind, FeatureValue, TransportId, WordOrder,
};

// =============================================================================
// Metadata
// =============================================================================

/// User-provided metadata for a feature, merged from the `features:` section
/// of the configuration. All fields flow into Home Assistant discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureMetadata {
    /// Display name.
    pub friendly_name: Option<String>,
    /// Home Assistant device class (e.g. `power`, `door`).
    pub device_class: Option<String>,
    /// Home Assistant state class (e.g. `measurement`).
    pub state_class: Option<String>,
    /// Unit of measurement for analog features.
    pub unit_of_measurement: Option<String>,
    /// Suggested Home Assistant area.
    pub suggested_area: Option<String>,
    /// Icon override.
    pub icon: Option<String>,
    /// Invert the reported state. Meaningful only for digital inputs.
    pub invert_state: bool,
    /// Entity object id override.
    pub object_id: Option<String>,
    /// Decimal places for published float payloads.
    pub precision: Option<u8>,
}

// =============================================================================
// Codec
// =============================================================================

/// How a feature maps onto its backing registers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureCodec {
    /// One bit of a register.
    Bit {
        /// Backing register address.
        reg: u16,
        /// Bit position within the register (0..16).
        bit: u8,
        /// FC 05 coil address, when the definition flags the bit as a coil.
        coil: Option<u16>,
        /// Pre-packed register values for FC 06 writes (ON, OFF).
        packed: Option<(u16, u16)>,
    },
    /// A raw 16-bit register.
    U16 {
        /// Backing register address.
        reg: u16,
    },
    /// Two registers forming an IEEE-754 float.
    F32 {
        /// First backing register address.
        reg: u16,
        /// Word order declared by the hardware definition.
        order: WordOrder,
    },
}

impl FeatureCodec {
    /// Returns the `(start, count)` register span backing this codec.
    pub fn span(&self) -> (u16, u16) {
        match self {
            FeatureCodec::Bit { reg, .. } => (*reg, 1),
            FeatureCodec::U16 { reg } => (*reg, 1),
            FeatureCodec::F32 { reg, .. } => (*reg, 2),
        }
    }
}

// =============================================================================
// Feature
// =============================================================================

/// A typed I/O point bound to a register slice and codec.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Process-wide unique id (e.g. `ro_3_02`, `voltage_1`).
    pub id: FeatureId,
    /// Discriminated kind.
    pub kind: FeatureKind,
    /// Circuit position for board features; `None` for meter fields.
    pub circuit: Option<Circuit>,
    /// Owning transport.
    pub transport: TransportId,
    /// Modbus unit (slave) id.
    pub unit: u8,
    /// Register table the backing registers live in.
    pub block_kind: BlockKind,
    /// Register mapping.
    pub codec: FeatureCodec,
    /// User metadata.
    pub metadata: FeatureMetadata,
}

impl Feature {
    /// Returns `true` if this feature accepts writes.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.kind.is_writable()
    }

    /// Returns the `(start, count)` register span backing this feature.
    #[inline]
    pub fn span(&self) -> (u16, u16) {
        self.codec.span()
    }

    /// Returns `true` if this feature's backing registers intersect the
    /// half-open address range `[start, start + count)` of its table.
    pub fn intersects(&self, block_kind: BlockKind, start: u16, count: u16) -> bool {
        if self.block_kind != block_kind {
            return false;
        }
        let (reg, span) = self.span();
        (reg as u32) < start as u32 + count as u32 && (start as u32) < reg as u32 + span as u32
    }

    /// Display name: the user's `friendly_name` or a generated one.
    pub fn friendly_name(&self) -> String {
        if let Some(name) = &self.metadata.friendly_name {
            return name.clone();
        }
        match self.circuit {
            Some(circuit) => format!("{} {}", self.kind_label(), circuit),
            None => self.id.as_str().replace('_', " "),
        }
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            FeatureKind::DigitalInput => "Digital Input",
            FeatureKind::DigitalOutput => "Digital Output",
            FeatureKind::RelayOutput => "Relay",
            FeatureKind::Led => "LED",
            FeatureKind::AnalogInput => "Analog Input",
            FeatureKind::AnalogOutput => "Analog Output",
            FeatureKind::MeterField => "Meter",
        }
    }

    /// Decodes the current value from the cache.
    ///
    /// Returns `None` before the first successful read of the backing block.
    pub fn decode(&self, cache: &RegisterCache) -> Option<FeatureValue> {
        match &self.codec {
            FeatureCodec::Bit { reg, bit, .. } => {
                let word = cache.value(self.unit, self.block_kind, *reg)?;
                let mut on = word & (1 << bit) != 0;
                if self.kind == FeatureKind::DigitalInput && self.metadata.invert_state {
                    on = !on;
                }
                Some(FeatureValue::Bool(on))
            }
            FeatureCodec::U16 { reg } => {
                let word = cache.value(self.unit, self.block_kind, *reg)?;
                Some(FeatureValue::Float(f32::from(word)))
            }
            FeatureCodec::F32 { reg, order } => {
                let words = cache.values(self.unit, self.block_kind, *reg, 2)?;
                Some(FeatureValue::Float(order.decode_f32([words[0], words[1]])))
            }
        }
    }

    /// Decodes a value from an explicit register slice (the previous block
    /// snapshot during diffing). `start` is the slice's first address.
    pub fn decode_from(&self, start: u16, registers: &[u16]) -> Option<FeatureValue> {
        let (reg, span) = self.span();
        let offset = reg.checked_sub(start)? as usize;
        if offset + span as usize > registers.len() {
            return None;
        }

        match &self.codec {
            FeatureCodec::Bit { bit, .. } => {
                let mut on = registers[offset] & (1 << bit) != 0;
                if self.kind == FeatureKind::DigitalInput && self.metadata.invert_state {
                    on = !on;
                }
                Some(FeatureValue::Bool(on))
            }
            FeatureCodec::U16 { .. } => Some(FeatureValue::Float(f32::from(registers[offset]))),
            FeatureCodec::F32 { order, .. } => Some(FeatureValue::Float(
                order.decode_f32([registers[offset], registers[offset + 1]]),
            )),
        }
    }

    /// Encodes a write for this feature.
    pub fn encode_write(&self, value: FeatureValue) -> Result<PendingCommand, CommandError> {
        if !self.is_writable() {
            return Err(CommandError::not_writable(self.id.clone()));
        }

        match &self.codec {
            FeatureCodec::Bit { reg, coil, packed, .. } => {
                let on = value.as_bool().ok_or_else(|| {
                    CommandError::invalid_value(self.id.clone(), "expected ON/OFF")
                })?;
                if let Some(coil) = coil {
                    return Ok(PendingCommand::set_coil(self.unit, *coil, on));
                }
                match packed {
                    Some((on_value, off_value)) => Ok(PendingCommand::set_register(
                        self.unit,
                        *reg,
                        if on { *on_value } else { *off_value },
                    )),
                    None => Err(CommandError::invalid_value(
                        self.id.clone(),
                        "definition provides neither coil nor packed register values",
                    )),
                }
            }
            FeatureCodec::U16 { reg } => {
                let raw = value.as_f32().ok_or_else(|| {
                    CommandError::invalid_value(self.id.clone(), "expected a number")
                })?;
                if !(0.0..=f32::from(u16::MAX)).contains(&raw) {
                    return Err(CommandError::invalid_value(
                        self.id.clone(),
                        "value out of register range",
                    ));
                }
                Ok(PendingCommand::set_register(self.unit, *reg, raw as u16))
            }
            FeatureCodec::F32 { .. } => Err(CommandError::invalid_value(
                self.id.clone(),
                "float fields are read-only",
            )),
        }
    }
}

// =============================================================================
// FeatureRegistry
// =============================================================================

/// The immutable set of all features, keyed by id.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = FeatureRegistry::new();
/// let relay = registry.get(&FeatureId::new("ro_3_01")).unwrap();
/// let command = relay.encode_write(FeatureValue::Bool(true))?;
/// ```
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    features: Vec<Arc<Feature>>,
    by_id: HashMap<FeatureId, usize>,
}

impl FeatureRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a feature, enforcing process-wide id uniqueness.
    pub fn register(&mut self, feature: Feature) -> Result<(), ConfigError> {
        if self.by_id.contains_key(&feature.id) {
            return Err(ConfigError::DuplicateFeature {
                feature: feature.id,
            });
        }
        self.by_id.insert(feature.id.clone(), self.features.len());
        self.features.push(Arc::new(feature));
        Ok(())
    }

    /// Looks up a feature by id.
    pub fn get(&self, id: &FeatureId) -> Option<&Arc<Feature>> {
        self.by_id.get(id).map(|&i| &self.features[i])
    }

    /// Resolves a circuit string to a writable bit feature.
    ///
    /// Used to bind `cover_up` / `cover_down` circuits to their relays.
    pub fn by_output_circuit(&self, circuit: &str) -> Option<&Arc<Feature>> {
        let feature = self.get(&FeatureId::new(circuit))?;
        if feature.is_writable() && feature.kind.is_digital() {
            Some(feature)
        } else {
            None
        }
    }

    /// Iterates all features in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Feature>> {
        self.features.iter()
    }

    /// Iterates writable features.
    pub fn iter_writable(&self) -> impl Iterator<Item = &Arc<Feature>> {
        self.features.iter().filter(|f| f.is_writable())
    }

    /// Iterates readable features (all features are readable).
    pub fn iter_readable(&self) -> impl Iterator<Item = &Arc<Feature>> {
        self.features.iter()
    }

    /// Iterates features whose backing registers intersect a block range on
    /// the given transport and unit.
    pub fn intersecting<'a>(
        &'a self,
        transport: &'a TransportId,
        unit: u8,
        block_kind: BlockKind,
        start: u16,
        count: u16,
    ) -> impl Iterator<Item = &'a Arc<Feature>> {
        self.features.iter().filter(move |f| {
            f.transport == *transport && f.unit == unit && f.intersects(block_kind, start, count)
        })
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns `true` if no features are registered.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::types::RegisterBlock;

    fn relay(id: &str, bit: u8, coil: Option<u16>) -> Feature {
        Feature {
            id: FeatureId::new(id),
            kind: FeatureKind::RelayOutput,
            circuit: Some(Circuit::new(2, bit + 1)),
            transport: TransportId::new("tcp"),
            unit: 0,
            block_kind: BlockKind::Holding,
            codec: FeatureCodec::Bit {
                reg: 1,
                bit,
                coil,
                packed: None,
            },
            metadata: FeatureMetadata::default(),
        }
    }

    fn input(id: &str, bit: u8, invert: bool) -> Feature {
        Feature {
            id: FeatureId::new(id),
            kind: FeatureKind::DigitalInput,
            circuit: Some(Circuit::new(1, bit + 1)),
            transport: TransportId::new("tcp"),
            unit: 0,
            block_kind: BlockKind::Holding,
            codec: FeatureCodec::Bit {
                reg: 0,
                bit,
                coil: None,
                packed: None,
            },
            metadata: FeatureMetadata {
                invert_state: invert,
                ..Default::default()
            },
        }
    }

    fn meter(id: &str, reg: u16) -> Feature {
        Feature {
            id: FeatureId::new(id),
            kind: FeatureKind::MeterField,
            circuit: None,
            transport: TransportId::new("serial-1"),
            unit: 1,
            block_kind: BlockKind::Input,
            codec: FeatureCodec::F32 {
                reg,
                order: WordOrder::BigSwapped,
            },
            metadata: FeatureMetadata {
                precision: Some(1),
                ..Default::default()
            },
        }
    }

    fn cache_with(unit: u8, kind: BlockKind, start: u16, values: &[u16]) -> RegisterCache {
        let cache = RegisterCache::new();
        let block = RegisterBlock::new(start, values.len() as u16, kind);
        cache.register_block(unit, block);
        cache.update_block(unit, &block, values).unwrap();
        cache
    }

    #[test]
    fn test_bit_decode() {
        let cache = cache_with(0, BlockKind::Holding, 0, &[0b0000_0100, 0]);
        assert_eq!(
            input("di_1_03", 2, false).decode(&cache),
            Some(FeatureValue::Bool(true))
        );
        assert_eq!(
            input("di_1_02", 1, false).decode(&cache),
            Some(FeatureValue::Bool(false))
        );
    }

    #[test]
    fn test_invert_state_applies_to_inputs_only() {
        let cache = cache_with(0, BlockKind::Holding, 0, &[0, 0b0001]);
        assert_eq!(
            input("di_1_01", 0, true).decode(&cache),
            Some(FeatureValue::Bool(true))
        );

        // invert_state on an output is meaningless and ignored.
        let mut ro = relay("ro_2_01", 0, Some(8));
        ro.metadata.invert_state = true;
        assert_eq!(ro.decode(&cache), Some(FeatureValue::Bool(true)));
    }

    #[test]
    fn test_meter_decode() {
        let bits = 230.2f32.to_bits();
        let hi = (bits >> 16) as u16;
        let lo = (bits & 0xFFFF) as u16;
        let cache = cache_with(1, BlockKind::Input, 0, &[lo, hi]);

        let value = meter("voltage_1", 0).decode(&cache).unwrap();
        assert_eq!(value, FeatureValue::Float(230.2));
    }

    #[test]
    fn test_decode_before_first_read() {
        let cache = RegisterCache::new();
        cache.register_block(0, RegisterBlock::new(0, 2, BlockKind::Holding));
        assert_eq!(input("di_1_01", 0, false).decode(&cache), None);
    }

    #[test]
    fn test_encode_coil_write() {
        let command = relay("ro_2_01", 0, Some(8))
            .encode_write(FeatureValue::Bool(true))
            .unwrap();
        assert_eq!(command.kind, CommandKind::SetCoil);
        assert_eq!(command.address, 8);
        assert_eq!(command.value, 1);
    }

    #[test]
    fn test_encode_packed_register_write() {
        let mut ao = relay("do_2_01", 0, None);
        ao.codec = FeatureCodec::Bit {
            reg: 1,
            bit: 0,
            coil: None,
            packed: Some((0x0001, 0x0000)),
        };
        let command = ao.encode_write(FeatureValue::Bool(true)).unwrap();
        assert_eq!(command.kind, CommandKind::SetRegister);
        assert_eq!(command.value, 0x0001);
    }

    #[test]
    fn test_encode_rejects_unpacked_register_bit() {
        // No coil and no packed values: there is no legal write path.
        let err = relay("do_2_01", 0, None)
            .encode_write(FeatureValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidValue { .. }));
    }

    #[test]
    fn test_encode_rejects_read_only() {
        let err = input("di_1_01", 0, false)
            .encode_write(FeatureValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, CommandError::NotWritable { .. }));

        let err = meter("voltage_1", 0)
            .encode_write(FeatureValue::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, CommandError::NotWritable { .. }));
    }

    #[test]
    fn test_intersects() {
        let f = meter("voltage_1", 5);
        assert!(f.intersects(BlockKind::Input, 0, 7));
        assert!(f.intersects(BlockKind::Input, 6, 2));
        assert!(!f.intersects(BlockKind::Input, 7, 4));
        assert!(!f.intersects(BlockKind::Holding, 0, 16));
    }

    #[test]
    fn test_registry_unique_ids() {
        let mut registry = FeatureRegistry::new();
        registry.register(relay("ro_2_01", 0, Some(8))).unwrap();
        let err = registry.register(relay("ro_2_01", 1, Some(9))).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateFeature { .. }));
    }

    #[test]
    fn test_by_output_circuit() {
        let mut registry = FeatureRegistry::new();
        registry.register(relay("ro_2_01", 0, Some(8))).unwrap();
        registry.register(input("di_1_01", 0, false)).unwrap();

        assert!(registry.by_output_circuit("ro_2_01").is_some());
        // Digital inputs are not valid cover outputs.
        assert!(registry.by_output_circuit("di_1_01").is_none());
        assert!(registry.by_output_circuit("ro_9_99").is_none());
    }

    #[test]
    fn test_friendly_name_fallback() {
        let f = relay("ro_2_01", 0, Some(8));
        assert_eq!(f.friendly_name(), "Relay 2_01");

        let mut named = f.clone();
        named.metadata.friendly_name = Some("Garden pump".to_string());
        assert_eq!(named.friendly_name(), "Garden pump");
    }
}
