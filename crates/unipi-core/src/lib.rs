// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # unipi-core
//!
//! Core abstractions and shared types for the Unipi Control daemon.
//!
//! This crate provides the foundational pieces used across all components:
//!
//! - **Types**: identifiers, circuits, feature kinds and values, register
//!   blocks and word orders
//! - **Error**: unified error hierarchy
//! - **Cache**: the register cache scan loops write and everyone else reads
//! - **Features**: the typed feature registry and register codecs
//! - **Event**: feature-change events with last-value-wins back-pressure
//! - **Command**: the per-transport write queue with completion handles

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod command;
pub mod error;
pub mod event;
pub mod features;
pub mod types;

pub use cache::{BlockUpdate, RegisterCache};
pub use command::{
    CommandHandle, CommandKind, CommandQueue, CommandResult, CommandSender, InFlightCommand,
    PendingCommand,
};
pub use error::{CommandError, ConfigError, CoverError, Error, MqttError, Result, TransportError};
pub use event::{EventSender, FeatureChanged};
pub use features::{Feature, FeatureCodec, FeatureMetadata, FeatureRegistry};
pub use types::{
    BlockKind, Circuit, FeatureId, FeatureKind, FeatureValue, RegisterBlock, TransportId, Unit,
    WordOrder,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
