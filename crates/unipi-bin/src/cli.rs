// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: start the daemon (default when no subcommand is given)
//! - `validate`: parse and validate the configuration, then exit
//! - `version`: print version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Unipi Control - Modbus to MQTT bridge for Unipi Neuron/Patron units.
#[derive(Parser, Debug)]
#[command(
    name = "unipi-control",
    version = unipi_core::VERSION,
    about = "Bridges Unipi Neuron/Patron I/O to MQTT",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration directory (control.yaml and hardware definitions)
    #[arg(
        short,
        long,
        default_value = unipi_config::DEFAULT_CONFIG_DIR,
        env = "UNIPI_CONFIG_DIR",
        global = true
    )]
    pub config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "UNIPI_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "UNIPI_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the daemon
    ///
    /// This is the default command when no subcommand is specified.
    Run,

    /// Validate the configuration file
    ///
    /// Parses and validates control.yaml and the referenced hardware
    /// definitions without starting the daemon.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show the parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for log aggregation
    Json,
    /// Compact format for minimal output
    Compact,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// The effective command, defaulting to `Run`.
    pub fn effective_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

// =============================================================================
// Tests
// =============================================================================
