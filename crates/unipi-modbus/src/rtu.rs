// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus RTU (serial) transport.
//!
//! Talks RTU framing with CRC-16 to attached meters (e.g. Eastron SDM120M)
//! over an RS-485 adapter, using `tokio-modbus` with `tokio-serial`. As with
//! TCP, a mutex serializes frames on the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{Context as ModbusContext, Reader, Writer};
use tokio_modbus::prelude::*;
use tokio_serial::{Parity as SerialParity, SerialPortBuilderExt, StopBits as SerialStopBits};

use unipi_core::error::TransportError;
use unipi_core::types::TransportId;

use crate::convert::{map_exception, map_tokio_error};
use crate::transport::{ModbusTransport, TransportResult, TransportState};

// =============================================================================
// Configuration
// =============================================================================

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Serial stop bits setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    #[serde(rename = "1")]
    One,
    /// Two stop bits.
    #[serde(rename = "2")]
    Two,
}

/// Configuration for a Modbus RTU transport.
#[derive(Debug, Clone)]
pub struct RtuTransportConfig {
    /// Transport id.
    pub id: TransportId,
    /// Serial device path (e.g. `/dev/ttyNS0`).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Per-frame request timeout.
    pub frame_timeout: Duration,
}

impl RtuTransportConfig {
    /// Creates a 9600 8N1 config with the default 1 s frame timeout.
    pub fn new(id: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: TransportId::new(id),
            port: port.into(),
            baud_rate: 9600,
            parity: Parity::None,
            stop_bits: StopBits::One,
            frame_timeout: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// ModbusRtuTransport
// =============================================================================

struct RtuInner {
    context: Option<ModbusContext>,
}

/// Modbus RTU transport using `tokio-modbus` over a serial port.
pub struct ModbusRtuTransport {
    config: RtuTransportConfig,
    inner: Arc<Mutex<RtuInner>>,
    state: TransportState,
}

impl ModbusRtuTransport {
    /// Creates a new RTU transport.
    pub fn new(config: RtuTransportConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(RtuInner { context: None })),
            state: TransportState::Disconnected,
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &RtuTransportConfig {
        &self.config
    }

    fn convert_parity(parity: Parity) -> SerialParity {
        match parity {
            Parity::None => SerialParity::None,
            Parity::Odd => SerialParity::Odd,
            Parity::Even => SerialParity::Even,
        }
    }

    fn convert_stop_bits(bits: StopBits) -> SerialStopBits {
        match bits {
            StopBits::One => SerialStopBits::One,
            StopBits::Two => SerialStopBits::Two,
        }
    }
}

#[async_trait]
impl ModbusTransport for ModbusRtuTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;

        let builder = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .parity(Self::convert_parity(self.config.parity))
            .stop_bits(Self::convert_stop_bits(self.config.stop_bits));

        let serial = builder
            .open_native_async()
            .map_err(|e| TransportError::io(self.config.id.as_str(), e.to_string()))?;

        let ctx = rtu::attach_slave(serial, Slave(1));

        let mut inner = self.inner.lock().await;
        inner.context = Some(ctx);
        drop(inner);

        self.state = TransportState::Connected;

        tracing::info!(
            port = %self.config.port,
            baud_rate = self.config.baud_rate,
            "Opened Modbus RTU serial port"
        );

        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        // Dropping the context closes the serial handle.
        inner.context = None;
        drop(inner);
        self.state = TransportState::Disconnected;
        Ok(())
    }

    async fn reconnect(&mut self) -> TransportResult<()> {
        self.state = TransportState::Reconnecting;
        let _ = self.disconnect().await;
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn read_holding(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>> {
        let mut inner = self.inner.lock().await;
        let ctx = inner
            .context
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(self.config.id.as_str()))?;
        ctx.set_slave(Slave(unit));

        let result = timeout(
            self.config.frame_timeout,
            ctx.read_holding_registers(start, count),
        )
        .await
        .map_err(|_| TransportError::timeout(self.config.frame_timeout))?
        .map_err(|e| map_tokio_error(self.config.id.as_str(), self.config.frame_timeout, e))?
        .map_err(|e| map_exception(unit, start, e))?;

        Ok(result)
    }

    async fn read_input(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>> {
        let mut inner = self.inner.lock().await;
        let ctx = inner
            .context
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(self.config.id.as_str()))?;
        ctx.set_slave(Slave(unit));

        let result = timeout(
            self.config.frame_timeout,
            ctx.read_input_registers(start, count),
        )
        .await
        .map_err(|_| TransportError::timeout(self.config.frame_timeout))?
        .map_err(|e| map_tokio_error(self.config.id.as_str(), self.config.frame_timeout, e))?
        .map_err(|e| map_exception(unit, start, e))?;

        Ok(result)
    }

    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let ctx = inner
            .context
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(self.config.id.as_str()))?;
        ctx.set_slave(Slave(unit));

        timeout(
            self.config.frame_timeout,
            ctx.write_single_coil(address, value),
        )
        .await
        .map_err(|_| TransportError::timeout(self.config.frame_timeout))?
        .map_err(|e| map_tokio_error(self.config.id.as_str(), self.config.frame_timeout, e))?
        .map_err(|e| map_exception(unit, address, e))?;

        Ok(())
    }

    async fn write_single_register(
        &self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        let ctx = inner
            .context
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(self.config.id.as_str()))?;
        ctx.set_slave(Slave(unit));

        timeout(
            self.config.frame_timeout,
            ctx.write_single_register(address, value),
        )
        .await
        .map_err(|_| TransportError::timeout(self.config.frame_timeout))?
        .map_err(|e| map_tokio_error(self.config.id.as_str(), self.config.frame_timeout, e))?
        .map_err(|e| map_exception(unit, address, e))?;

        Ok(())
    }

    fn id(&self) -> &TransportId {
        &self.config.id
    }

    fn display_name(&self) -> String {
        format!("Modbus RTU {} @ {}", self.config.port, self.config.baud_rate)
    }
}

impl std::fmt::Debug for ModbusRtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuTransport")
            .field("port", &self.config.port)
            .field("baud_rate", &self.config.baud_rate)
            .field("state", &self.state)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RtuTransportConfig::new("serial-1", "/dev/ttyNS0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(
            ModbusRtuTransport::convert_parity(Parity::Even),
            SerialParity::Even
        );
        assert_eq!(
            ModbusRtuTransport::convert_parity(Parity::None),
            SerialParity::None
        );
    }

    #[tokio::test]
    async fn test_write_while_disconnected() {
        let transport =
            ModbusRtuTransport::new(RtuTransportConfig::new("serial-1", "/dev/ttyNS0"));
        let err = transport.write_single_coil(1, 0, true).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }
}
