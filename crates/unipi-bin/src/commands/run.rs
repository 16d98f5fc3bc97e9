// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `run` command: start the daemon.

use unipi_config::ConfigLoader;
use unipi_core::error::Error;

use crate::cli::Cli;
use crate::logging::init_logging;
use crate::runtime;

/// Loads the configuration, initializes logging and runs the daemon.
///
/// The log level precedence is CLI flag, then `logging.level` from the
/// configuration, then `info`.
pub async fn execute(cli: &Cli) -> Result<(), Error> {
    let loader = ConfigLoader::new(&cli.config_dir);
    let config = loader.load_config()?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, cli.log_format);

    runtime::run(loader, config).await
}
