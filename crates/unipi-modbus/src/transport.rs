// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Abstract transport layer for Modbus communication.
//!
//! This module defines the [`ModbusTransport`] trait that provides a unified
//! interface for the TCP (Neuron coprocessors) and RTU (attached meters)
//! transports. Every operation addresses an explicit unit id because a single
//! RS-485 bus carries several meters.
//!
//! All operations on one transport are strictly serialized: at most one
//! outstanding frame at a time, enforced by a mutex inside each
//! implementation.

use std::fmt;

use async_trait::async_trait;

use unipi_core::error::TransportError;
use unipi_core::types::TransportId;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    /// Transport is disconnected.
    #[default]
    Disconnected,
    /// Transport is connecting.
    Connecting,
    /// Transport is connected and ready.
    Connected,
    /// Transport is reconnecting after a failure.
    Reconnecting,
}

impl TransportState {
    /// Returns `true` if the transport is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// ModbusTransport Trait
// =============================================================================

/// Abstract transport layer for Modbus communication.
///
/// # Implementors
///
/// - [`ModbusTcpTransport`](super::tcp::ModbusTcpTransport): MBAP over TCP
/// - [`ModbusRtuTransport`](super::rtu::ModbusRtuTransport): RTU over serial
///
/// Reads return register words; digital features are decoded from those
/// words by the feature registry, so the coil-read function codes are not
/// needed here.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Establishes the connection.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Gracefully closes the connection.
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// Drops the connection and establishes it again.
    async fn reconnect(&mut self) -> TransportResult<()> {
        let _ = self.disconnect().await;
        self.connect().await
    }

    /// Returns `true` if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Returns the current transport state.
    fn state(&self) -> TransportState;

    /// Reads holding registers (FC 03).
    async fn read_holding(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>>;

    /// Reads input registers (FC 04).
    async fn read_input(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>>;

    /// Writes a single coil (FC 05).
    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> TransportResult<()>;

    /// Writes a single holding register (FC 06).
    async fn write_single_register(&self, unit: u8, address: u16, value: u16)
        -> TransportResult<()>;

    /// Returns the transport id.
    fn id(&self) -> &TransportId;

    /// Returns a display name for logging.
    fn display_name(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================
