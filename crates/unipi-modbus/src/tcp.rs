// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus TCP transport.
//!
//! Talks MBAP framing to the on-board Neuron coprocessors using the
//! `tokio-modbus` crate. A mutex around the inner context serializes frames:
//! at most one outstanding request at a time on the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{Context as ModbusContext, Reader, Writer};
use tokio_modbus::prelude::*;

use unipi_core::error::TransportError;
use unipi_core::types::TransportId;

use crate::convert::{map_exception, map_tokio_error};
use crate::transport::{ModbusTransport, TransportResult, TransportState};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a Modbus TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Transport id.
    pub id: TransportId,
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-frame request timeout.
    pub frame_timeout: Duration,
}

impl TcpTransportConfig {
    /// Creates a config with the default timeouts (5 s connect, 1 s frame).
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: TransportId::new(id),
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            frame_timeout: Duration::from_secs(1),
        }
    }

    /// Returns `host:port`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// ModbusTcpTransport
// =============================================================================

struct TcpInner {
    context: Option<ModbusContext>,
}

/// Modbus TCP transport using `tokio-modbus`.
pub struct ModbusTcpTransport {
    config: TcpTransportConfig,
    inner: Arc<Mutex<TcpInner>>,
    state: TransportState,
}

impl ModbusTcpTransport {
    /// Creates a new TCP transport.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(TcpInner { context: None })),
            state: TransportState::Disconnected,
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    async fn resolve_address(&self) -> TransportResult<SocketAddr> {
        let addr_str = self.config.socket_addr();

        if let Ok(addr) = addr_str.parse::<SocketAddr>() {
            return Ok(addr);
        }

        let mut addrs = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| TransportError::io(self.config.id.as_str(), e.to_string()))?;

        addrs.next().ok_or_else(|| {
            TransportError::io(
                self.config.id.as_str(),
                format!("no address for host '{}'", self.config.host),
            )
        })
    }
}

#[async_trait]
impl ModbusTransport for ModbusTcpTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;

        let socket_addr = self.resolve_address().await?;

        let connect_future = async {
            let stream = TcpStream::connect(socket_addr)
                .await
                .map_err(|e| TransportError::io(self.config.id.as_str(), e.to_string()))?;
            stream.set_nodelay(true).ok();

            Ok::<_, TransportError>(tcp::attach_slave(stream, Slave(0)))
        };

        let ctx = timeout(self.config.connect_timeout, connect_future)
            .await
            .map_err(|_| TransportError::timeout(self.config.connect_timeout))??;

        let mut inner = self.inner.lock().await;
        inner.context = Some(ctx);
        drop(inner);

        self.state = TransportState::Connected;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "Connected to Modbus TCP endpoint"
        );

        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mut ctx) = inner.context.take() {
            if let Err(e) = ctx.disconnect().await {
                tracing::debug!(error = %e, "Error closing Modbus TCP connection");
            }
        }
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
        format!("Modbus TCP {}:{}", self.config.host, self.config.port)
    }
}

impl std::fmt::Debug for ModbusTcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTcpTransport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
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
        let config = TcpTransportConfig::new("tcp", "127.0.0.1", 502);
        assert_eq!(config.socket_addr(), "127.0.0.1:502");
        assert_eq!(config.frame_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_initial_state() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::new("tcp", "127.0.0.1", 502));
        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(!transport.is_connected());
        assert_eq!(transport.display_name(), "Modbus TCP 127.0.0.1:502");
    }

    #[tokio::test]
    async fn test_read_while_disconnected() {
        let transport = ModbusTcpTransport::new(TcpTransportConfig::new("tcp", "127.0.0.1", 502));
        let err = transport.read_holding(0, 0, 4).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }
}
