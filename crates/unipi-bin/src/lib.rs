// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # unipi-bin
//!
//! Binary entry point for the Unipi Control daemon: CLI parsing, logging
//! setup, shutdown coordination and runtime wiring.

#![deny(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;
