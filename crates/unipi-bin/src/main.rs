// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unipi Control - bridges a Unipi Neuron/Patron unit to an MQTT broker.
//!
//! Polls the local Modbus endpoints, exposes every I/O point as MQTT
//! topics, accepts commands to drive outputs and covers, and registers the
//! device in Home Assistant via MQTT discovery.

use clap::Parser;

use unipi_bin::cli::Cli;
use unipi_bin::commands;
use unipi_bin::error::report_error_and_exit;

/// Application entry point.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(error) = commands::execute(cli).await {
        report_error_and_exit(error);
    }
}
