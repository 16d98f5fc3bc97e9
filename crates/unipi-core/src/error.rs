// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for Unipi Control.
//!
//! # Error Hierarchy
//!
//! ```text
//! Error (root)
//! ├── TransportError  - Modbus socket/serial I/O, framing, exceptions
//! ├── CommandError    - Write command submission and completion
//! ├── ConfigError     - Configuration and hardware-definition validation
//! ├── CoverError      - Cover controller faults
//! └── MqttError       - Broker connection and publishing
//! ```
//!
//! Transient faults (transport I/O, broker disconnects) are retryable and
//! never terminate the process; only startup-time configuration errors and
//! MQTT retry exhaustion are fatal.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::FeatureId;

/// Convenience result alias for the root error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Error - Root Error Type
// =============================================================================

/// The root error type for Unipi Control.
#[derive(Debug, Error)]
pub enum Error {
    /// Modbus transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Write command error.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cover controller error.
    #[error("Cover error: {0}")]
    Cover(#[from] CoverError),

    /// MQTT error.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),
}

impl Error {
    /// Returns `true` if this error is transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Command(e) => e.is_retryable(),
            Error::Mqtt(e) => e.is_retryable(),
            Error::Config(_) => false,
            Error::Cover(_) => false,
        }
    }

    /// Returns the error category as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Command(_) => "command",
            Error::Config(_) => "config",
            Error::Cover(_) => "cover",
            Error::Mqtt(_) => "mqtt",
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Modbus transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket or serial I/O failure.
    #[error("I/O failure on {transport}: {message}")]
    Io {
        /// Transport name.
        transport: String,
        /// Error message.
        message: String,
    },

    /// Request did not complete within the frame timeout.
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// The configured frame timeout.
        timeout: Duration,
    },

    /// The peer answered with a Modbus exception frame.
    #[error("Modbus exception {code:#04x} from unit {unit} at address {address}")]
    Exception {
        /// Unit (slave) id.
        unit: u8,
        /// Register or coil address.
        address: u16,
        /// Exception code from the reply.
        code: u8,
    },

    /// CRC or MBAP length mismatch. Treated like an I/O failure.
    #[error("Framing error on {transport}: {message}")]
    Framing {
        /// Transport name.
        transport: String,
        /// Error message.
        message: String,
    },

    /// Operation attempted while disconnected.
    #[error("Transport {transport} is not connected")]
    NotConnected {
        /// Transport name.
        transport: String,
    },
}

impl TransportError {
    /// Creates an I/O error.
    pub fn io(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            transport: transport.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a Modbus exception error.
    pub fn exception(unit: u8, address: u16, code: u8) -> Self {
        Self::Exception { unit, address, code }
    }

    /// Creates a framing error.
    pub fn framing(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Framing {
            transport: transport.into(),
            message: message.into(),
        }
    }

    /// Creates a not-connected error.
    pub fn not_connected(transport: impl Into<String>) -> Self {
        Self::NotConnected {
            transport: transport.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    ///
    /// Exceptions are deterministic replies from the peer; retrying the same
    /// request would produce the same answer, so only I/O-level faults retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Exception { .. })
    }

    /// Returns `true` if this error counts towards the degraded threshold.
    pub fn is_io_fault(&self) -> bool {
        matches!(
            self,
            TransportError::Io { .. }
                | TransportError::Timeout { .. }
                | TransportError::Framing { .. }
                | TransportError::NotConnected { .. }
        )
    }
}

// =============================================================================
// CommandError
// =============================================================================

/// Write command errors, surfaced through completion handles.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    /// The command waited in the queue past its deadline.
    #[error("Command for unit {unit} address {address} timed out in queue")]
    Timeout {
        /// Target unit.
        unit: u8,
        /// Target address.
        address: u16,
    },

    /// The physical write failed after retry exhaustion.
    #[error("Write to unit {unit} address {address} failed: {message}")]
    WriteFailed {
        /// Target unit.
        unit: u8,
        /// Target address.
        address: u16,
        /// Underlying transport error message.
        message: String,
    },

    /// The queue was shut down before the command completed.
    #[error("Command queue closed")]
    QueueClosed,

    /// The feature does not accept writes.
    #[error("Feature '{feature}' is not writable")]
    NotWritable {
        /// The read-only feature.
        feature: FeatureId,
    },

    /// The command payload could not be encoded for the feature.
    #[error("Invalid value for feature '{feature}': {message}")]
    InvalidValue {
        /// Target feature.
        feature: FeatureId,
        /// Error message.
        message: String,
    },
}

impl CommandError {
    /// Creates a timeout error.
    pub fn timeout(unit: u8, address: u16) -> Self {
        Self::Timeout { unit, address }
    }

    /// Creates a write-failed error.
    pub fn write_failed(unit: u8, address: u16, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            unit,
            address,
            message: message.into(),
        }
    }

    /// Creates a not-writable error.
    pub fn not_writable(feature: FeatureId) -> Self {
        Self::NotWritable { feature }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(feature: FeatureId, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            feature,
            message: message.into(),
        }
    }

    /// Returns `true` if resubmitting the command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommandError::Timeout { .. } | CommandError::WriteFailed { .. }
        )
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Configuration and hardware-definition errors. Fatal, startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse a YAML file.
    #[error("Failed to parse '{path}': {message}")]
    Parse {
        /// Path to the file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// A field failed validation.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The offending field.
        field: String,
        /// Error message.
        message: String,
    },

    /// File I/O error.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A cover references a circuit that does not resolve to a writable
    /// output feature.
    #[error("Circuit '{circuit}' not found or not a writable output")]
    UnknownCircuit {
        /// The unresolved circuit string.
        circuit: String,
    },

    /// Two features resolved to the same id.
    #[error("Duplicate feature id: {feature}")]
    DuplicateFeature {
        /// The duplicated id.
        feature: FeatureId,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown-circuit error.
    pub fn unknown_circuit(circuit: impl Into<String>) -> Self {
        Self::UnknownCircuit {
            circuit: circuit.into(),
        }
    }
}

// =============================================================================
// CoverError
// =============================================================================

/// Cover controller errors.
#[derive(Debug, Error)]
pub enum CoverError {
    /// Both relays would have been commanded on. Reached only by a logic
    /// bug; the motor is quiesced before this is surfaced.
    #[error("Safety violation on cover '{cover}': both relays commanded on")]
    SafetyViolation {
        /// The affected cover.
        cover: String,
    },

    /// Position file could not be written.
    #[error("Failed to persist position for cover '{cover}': {source}")]
    Persist {
        /// The affected cover.
        cover: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A relay write failed while the cover was moving.
    #[error("Relay write failed on cover '{cover}': {message}")]
    RelayWrite {
        /// The affected cover.
        cover: String,
        /// Underlying command error message.
        message: String,
    },
}

// =============================================================================
// MqttError
// =============================================================================

/// MQTT connection and publishing errors.
#[derive(Debug, Error)]
pub enum MqttError {
    /// Broker connection failed or dropped. Transient.
    #[error("Connection to {broker} failed: {message}")]
    Connection {
        /// Broker address.
        broker: String,
        /// Error message.
        message: String,
    },

    /// Reconnect attempts exhausted the retry limit. Fatal.
    #[error("Gave up reconnecting to {broker} after {attempts} attempts")]
    RetryExhausted {
        /// Broker address.
        broker: String,
        /// Attempts made.
        attempts: u32,
    },

    /// A publish or subscribe request could not be queued.
    #[error("MQTT request failed: {message}")]
    Request {
        /// Error message.
        message: String,
    },
}

impl MqttError {
    /// Creates a connection error.
    pub fn connection(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Creates a request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MqttError::RetryExhausted { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
