// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Process-level error reporting and exit codes.
//!
//! Exit codes: `0` clean stop, `1` fatal configuration error, `2` fatal
//! transport error, `3` fatal MQTT error after retry exhaustion.

use unipi_core::error::Error;

/// Maps a fatal error to the process exit code.
pub fn exit_code(error: &Error) -> i32 {
    match error {
        Error::Config(_) => 1,
        Error::Transport(_) => 2,
        Error::Mqtt(_) => 3,
        _ => 1,
    }
}

/// Reports a fatal error and exits with its code.
///
/// Written to stderr directly; configuration errors can occur before the
/// logging subsystem is initialized.
pub fn report_error_and_exit(error: Error) -> ! {
    eprintln!("Error: {error}");
    std::process::exit(exit_code(&error));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use unipi_core::error::{ConfigError, MqttError, TransportError};

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code(&Error::Config(ConfigError::validation("x", "bad"))),
            1
        );
        assert_eq!(
            exit_code(&Error::Transport(TransportError::io("serial-1", "no such device"))),
            2
        );
        assert_eq!(
            exit_code(&Error::Mqtt(MqttError::RetryExhausted {
                broker: "localhost:1883".to_string(),
                attempts: 30
            })),
            3
        );
    }
}
