// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # unipi-modbus
//!
//! Modbus transports and the scan loop for the Unipi Control daemon.
//!
//! - **transport**: the [`ModbusTransport`] trait shared by TCP and RTU
//! - **tcp**: MBAP over TCP to the on-board Neuron coprocessors
//! - **rtu**: RTU over serial to attached meters
//! - **health**: degraded-state tracking with capped exponential backoff
//! - **poller**: the periodic scan loop with write interleaving

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod convert;

pub mod health;
pub mod poller;
pub mod rtu;
pub mod tcp;
pub mod transport;

pub use health::{HealthTransition, TransportHealth};
pub use poller::{PollerSettings, ScanLoop, TransportStatus};
pub use rtu::{ModbusRtuTransport, Parity, RtuTransportConfig, StopBits};
pub use tcp::{ModbusTcpTransport, TcpTransportConfig};
pub use transport::{ModbusTransport, TransportResult, TransportState};
