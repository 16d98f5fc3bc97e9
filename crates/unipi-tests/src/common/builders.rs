// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Builders for test fixtures.
//!
//! The standard fixture is a small Neuron-like board: one holding block of
//! two registers, register 0 carrying four digital inputs (group 1) and
//! register 1 carrying four relay outputs (group 2) with coils 8..=11.

use unipi_config::{Config, HardwareDefinition};
use unipi_core::features::FeatureRegistry;
use unipi_core::types::{TransportId, Unit};

use super::mocks::MockHandle;

/// YAML for the standard test board.
pub const TEST_BOARD_YAML: &str = r#"
model: TEST-BOARD
modbus_register_blocks:
  - start_reg: 0
    count: 2
modbus_features:
  - type: di
    count: 4
    major_group: 1
    val_reg: 0
  - type: ro
    count: 4
    major_group: 2
    val_reg: 1
    val_coil: 8
"#;

/// Parses the standard test board definition.
pub fn test_board() -> HardwareDefinition {
    serde_yaml::from_str(TEST_BOARD_YAML).expect("test definition parses")
}

/// Builds the unit (register blocks) for the standard board on `tcp`.
pub fn test_unit(transport: &TransportId) -> Unit {
    unipi_config::build_unit(transport, 0, &test_board()).expect("test unit builds")
}

/// Builds the registry for the standard board.
pub fn test_registry(transport: &TransportId, config: &Config) -> FeatureRegistry {
    let mut registry = FeatureRegistry::new();
    unipi_config::build_features(transport, 0, &test_board(), config, &mut registry)
        .expect("test features build");
    registry
}

/// Wires the standard board's coils into a mock transport.
pub fn map_test_board_coils(handle: &MockHandle) {
    for index in 0..4u16 {
        handle.map_coil(0, 8 + index, 1, index as u8);
    }
}
