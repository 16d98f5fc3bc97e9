// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command execution.

mod run;
mod validate;
mod version;

use unipi_core::error::Error;

use crate::cli::{Cli, Commands};

/// Executes the selected command.
pub async fn execute(cli: Cli) -> Result<(), Error> {
    match cli.effective_command() {
        Commands::Run => run::execute(&cli).await,
        Commands::Validate(args) => validate::execute(&cli, &args),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
