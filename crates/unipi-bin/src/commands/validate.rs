// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `validate` command: parse and validate the configuration.

use unipi_config::ConfigLoader;
use unipi_core::error::Error;

use crate::cli::{Cli, ValidateArgs};

/// Validates `control.yaml` and every referenced hardware definition.
pub fn execute(cli: &Cli, args: &ValidateArgs) -> Result<(), Error> {
    let loader = ConfigLoader::new(&cli.config_dir);
    let config = loader.load_config()?;

    loader.load_definition(&config.modbus_tcp.device)?;
    for serial in &config.modbus_serial {
        loader.load_definition(&serial.device)?;
    }

    println!("Configuration OK");
    println!("  device_name: {}", config.device_name);
    println!("  covers: {}", config.covers.len());
    println!("  serial devices: {}", config.modbus_serial.len());

    if args.show_config {
        match serde_yaml::to_string(&config) {
            Ok(rendered) => println!("\n{rendered}"),
            Err(error) => eprintln!("Could not render configuration: {error}"),
        }
    }

    Ok(())
}
