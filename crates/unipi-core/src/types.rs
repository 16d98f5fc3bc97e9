// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for Unipi Control.
//!
//! This module provides the identifiers and value types shared by all other
//! crates: feature identifiers and circuits, Modbus addressing (transports,
//! units, register blocks) and the decoded feature values published over MQTT.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// A unique identifier for a feature.
///
/// Feature IDs are stable across restarts and unique process-wide. For
/// hardware features the ID equals the circuit string (e.g. `ro_3_02`),
/// for meter fields it is `<field>_<unit>` (e.g. `voltage_1`).
///
/// # Examples
///
/// ```
/// use unipi_core::types::FeatureId;
///
/// let id = FeatureId::new("ro_3_02");
/// assert_eq!(id.as_str(), "ro_3_02");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Creates a new feature ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for FeatureId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A unique identifier for a Modbus transport (e.g. `tcp`, `serial-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    /// Creates a new transport ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransportId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Circuit
// =============================================================================

/// A Unipi circuit position: slot group and channel on a board.
///
/// Circuits render as `<type>_<group>_<channel>` where group is `1..9` and
/// channel is zero-padded to two digits (`01..99`), e.g. `di_3_02`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Circuit {
    /// Board slot group (1..9).
    pub group: u8,
    /// Channel within the group (1..99).
    pub channel: u8,
}

impl Circuit {
    /// Creates a new circuit position.
    pub fn new(group: u8, channel: u8) -> Self {
        Self { group, channel }
    }

    /// Renders the full circuit string for a feature kind prefix.
    pub fn feature_id(&self, kind: FeatureKind) -> FeatureId {
        FeatureId::new(format!("{}_{}_{:02}", kind.prefix(), self.group, self.channel))
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.group, self.channel)
    }
}

// =============================================================================
// FeatureKind
// =============================================================================

/// Discriminated feature kinds.
///
/// The dynamic handler lookup of the hardware definition resolves to this sum
/// type; all registry APIs dispatch on the variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Digital input, one bit of a register, read-only.
    DigitalInput,
    /// Digital output, one bit, read-write.
    DigitalOutput,
    /// Relay output, one bit, read-write.
    RelayOutput,
    /// User LED, one bit, read-write.
    Led,
    /// Analog input channel, read-only.
    AnalogInput,
    /// Analog output channel, read-write.
    AnalogOutput,
    /// Energy meter register field, read-only.
    MeterField,
}

impl FeatureKind {
    /// Returns the circuit prefix for this kind (`di`, `do`, `ro`, ...).
    pub fn prefix(&self) -> &'static str {
        match self {
            FeatureKind::DigitalInput => "di",
            FeatureKind::DigitalOutput => "do",
            FeatureKind::RelayOutput => "ro",
            FeatureKind::Led => "led",
            FeatureKind::AnalogInput => "ai",
            FeatureKind::AnalogOutput => "ao",
            FeatureKind::MeterField => "meter",
        }
    }

    /// Returns the MQTT topic component for this kind.
    ///
    /// Relay and digital outputs share the `relay` component; the hardware
    /// kind is still visible in the circuit prefix of the topic leaf.
    pub fn topic_component(&self) -> &'static str {
        match self {
            FeatureKind::DigitalInput | FeatureKind::AnalogInput => "input",
            FeatureKind::DigitalOutput | FeatureKind::RelayOutput => "relay",
            FeatureKind::Led => "led",
            FeatureKind::AnalogOutput => "output",
            FeatureKind::MeterField => "meter",
        }
    }

    /// Returns `true` if features of this kind accept writes.
    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            FeatureKind::DigitalOutput
                | FeatureKind::RelayOutput
                | FeatureKind::Led
                | FeatureKind::AnalogOutput
        )
    }

    /// Returns `true` if this kind decodes to a single bit.
    #[inline]
    pub fn is_digital(&self) -> bool {
        matches!(
            self,
            FeatureKind::DigitalInput
                | FeatureKind::DigitalOutput
                | FeatureKind::RelayOutput
                | FeatureKind::Led
        )
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

// =============================================================================
// FeatureValue
// =============================================================================

/// A decoded feature value.
///
/// Digital features decode to [`FeatureValue::Bool`] and publish as
/// `"ON"`/`"OFF"`; analog channels and meter fields decode to
/// [`FeatureValue::Float`]. A feature that has never been read successfully
/// has no value (`Option::None` at the call sites).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeatureValue {
    /// Digital state.
    Bool(bool),
    /// Analog or meter reading.
    Float(f32),
}

impl FeatureValue {
    /// Attempts to read this value as a bool.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to read this value as a float.
    #[inline]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Renders the MQTT payload for this value.
    ///
    /// Digital values render as `ON`/`OFF`. Floats render with the given
    /// decimal precision, or the shortest exact representation when no
    /// precision is configured.
    pub fn payload(&self, precision: Option<u8>) -> String {
        match self {
            FeatureValue::Bool(true) => "ON".to_string(),
            FeatureValue::Bool(false) => "OFF".to_string(),
            FeatureValue::Float(v) => match precision {
                Some(p) => format!("{:.*}", p as usize, v),
                None => format!("{}", v),
            },
        }
    }

    /// Parses an `ON`/`OFF` command payload.
    pub fn parse_switch(payload: &str) -> Option<bool> {
        match payload {
            "ON" => Some(true),
            "OFF" => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload(None))
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<f32> for FeatureValue {
    fn from(v: f32) -> Self {
        FeatureValue::Float(v)
    }
}

// =============================================================================
// Register Blocks
// =============================================================================

/// The Modbus register table a block lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Holding registers (FC 03, writable).
    Holding,
    /// Input registers (FC 04, read-only).
    Input,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Holding => write!(f, "holding"),
            BlockKind::Input => write!(f, "input"),
        }
    }
}

/// A contiguous range of Modbus registers read in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterBlock {
    /// First register address.
    pub start: u16,
    /// Number of registers.
    pub count: u16,
    /// Register table.
    pub kind: BlockKind,
}

impl RegisterBlock {
    /// Creates a new register block.
    pub fn new(start: u16, count: u16, kind: BlockKind) -> Self {
        Self { start, count, kind }
    }

    /// Returns `true` if `address` falls inside this block.
    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && (address as u32) < self.start as u32 + self.count as u32
    }

    /// Returns `true` if the address range overlaps `other` in the same table.
    pub fn overlaps(&self, other: &RegisterBlock) -> bool {
        self.kind == other.kind
            && (self.start as u32) < other.start as u32 + other.count as u32
            && (other.start as u32) < self.start as u32 + self.count as u32
    }
}

/// A Modbus endpoint: a unit id behind a transport, with its register blocks.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Owning transport.
    pub transport: TransportId,
    /// Modbus unit (slave) id.
    pub unit_id: u8,
    /// Register blocks, sorted by start address.
    pub blocks: Vec<RegisterBlock>,
}

impl Unit {
    /// Creates a unit, sorting its blocks by start address.
    pub fn new(transport: TransportId, unit_id: u8, mut blocks: Vec<RegisterBlock>) -> Self {
        blocks.sort_by_key(|b| (b.kind == BlockKind::Input, b.start));
        Self {
            transport,
            unit_id,
            blocks,
        }
    }

    /// Checks the no-overlap invariant for blocks in the same table.
    pub fn validate(&self) -> Result<(), (RegisterBlock, RegisterBlock)> {
        for (i, a) in self.blocks.iter().enumerate() {
            for b in self.blocks.iter().skip(i + 1) {
                if a.overlaps(b) {
                    return Err((*a, *b));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Word Order
// =============================================================================

/// Word/byte order for multi-register float fields.
///
/// Declared per hardware definition; Eastron meters use the word-swapped
/// big-endian layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// High word first, bytes big-endian.
    Big,
    /// Low word first, bytes big-endian.
    #[default]
    BigSwapped,
    /// Low word first, bytes little-endian.
    Little,
    /// High word first, bytes little-endian.
    LittleSwapped,
}

impl WordOrder {
    /// Assembles an IEEE-754 `f32` from two registers.
    pub fn decode_f32(&self, regs: [u16; 2]) -> f32 {
        let [r0, r1] = regs;
        let bytes = match self {
            WordOrder::Big => {
                let a = r0.to_be_bytes();
                let b = r1.to_be_bytes();
                [a[0], a[1], b[0], b[1]]
            }
            WordOrder::BigSwapped => {
                let a = r1.to_be_bytes();
                let b = r0.to_be_bytes();
                [a[0], a[1], b[0], b[1]]
            }
            WordOrder::Little => {
                let a = r0.to_le_bytes();
                let b = r1.to_le_bytes();
                return f32::from_le_bytes([a[0], a[1], b[0], b[1]]);
            }
            WordOrder::LittleSwapped => {
                let a = r1.to_le_bytes();
                let b = r0.to_le_bytes();
                return f32::from_le_bytes([a[0], a[1], b[0], b[1]]);
            }
        };
        f32::from_be_bytes(bytes)
    }

    /// Splits an IEEE-754 `f32` into two registers.
    pub fn encode_f32(&self, value: f32) -> [u16; 2] {
        let be = value.to_be_bytes();
        let hi = u16::from_be_bytes([be[0], be[1]]);
        let lo = u16::from_be_bytes([be[2], be[3]]);
        match self {
            WordOrder::Big => [hi, lo],
            WordOrder::BigSwapped => [lo, hi],
            WordOrder::Little => [lo.swap_bytes(), hi.swap_bytes()],
            WordOrder::LittleSwapped => [hi.swap_bytes(), lo.swap_bytes()],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
