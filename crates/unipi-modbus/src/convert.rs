// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mapping from `tokio-modbus` errors to the transport error hierarchy.

use std::time::Duration;

use tokio_modbus::{Error as TokioModbusError, ExceptionCode};

use unipi_core::error::TransportError;

/// Converts an [`ExceptionCode`] to its wire value.
pub(crate) fn exception_code_to_u8(code: &ExceptionCode) -> u8 {
    match code {
        ExceptionCode::IllegalFunction => 0x01,
        ExceptionCode::IllegalDataAddress => 0x02,
        ExceptionCode::IllegalDataValue => 0x03,
        ExceptionCode::ServerDeviceFailure => 0x04,
        ExceptionCode::Acknowledge => 0x05,
        ExceptionCode::ServerDeviceBusy => 0x06,
        ExceptionCode::MemoryParityError => 0x08,
        ExceptionCode::GatewayPathUnavailable => 0x0A,
        ExceptionCode::GatewayTargetDevice => 0x0B,
        _ => 0xFF,
    }
}

/// Maps a peer exception frame.
pub(crate) fn map_exception(unit: u8, address: u16, code: ExceptionCode) -> TransportError {
    TransportError::exception(unit, address, exception_code_to_u8(&code))
}

/// Maps a `tokio-modbus` transport-level error.
///
/// Protocol-level failures (short frames, bad MBAP length, CRC mismatch on
/// RTU) are framing errors; everything else is plain I/O.
pub(crate) fn map_tokio_error(
    transport: &str,
    frame_timeout: Duration,
    error: TokioModbusError,
) -> TransportError {
    match error {
        TokioModbusError::Transport(io_error) => {
            use std::io::ErrorKind;
            match io_error.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                    TransportError::timeout(frame_timeout)
                }
                ErrorKind::InvalidData => {
                    TransportError::framing(transport, io_error.to_string())
                }
                ErrorKind::NotConnected => TransportError::not_connected(transport),
                _ => TransportError::io(transport, io_error.to_string()),
            }
        }
        TokioModbusError::Protocol(protocol_error) => {
            TransportError::framing(transport, format!("{protocol_error:?}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_codes() {
        assert_eq!(exception_code_to_u8(&ExceptionCode::IllegalFunction), 0x01);
        assert_eq!(exception_code_to_u8(&ExceptionCode::IllegalDataAddress), 0x02);
        assert_eq!(exception_code_to_u8(&ExceptionCode::ServerDeviceBusy), 0x06);
    }

    #[test]
    fn test_io_error_mapping() {
        let err = map_tokio_error(
            "tcp",
            Duration::from_secs(1),
            TokioModbusError::Transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            )),
        );
        assert!(matches!(err, TransportError::Io { .. }));

        let err = map_tokio_error(
            "tcp",
            Duration::from_secs(1),
            TokioModbusError::Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")),
        );
        assert!(matches!(err, TransportError::Timeout { .. }));

        let err = map_tokio_error(
            "serial-1",
            Duration::from_secs(1),
            TokioModbusError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "crc mismatch",
            )),
        );
        assert!(matches!(err, TransportError::Framing { .. }));
    }
}
