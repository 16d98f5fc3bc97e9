// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared test utilities for integration tests.
//!
//! - `mocks`: the scriptable mock Modbus transport
//! - `builders`: the standard test board fixture
//! - `harness`: a running scan loop plus optional cover controllers

pub mod builders;
pub mod harness;
pub mod mocks;

pub use builders::*;
pub use harness::*;
pub use mocks::*;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes test logging once per process.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,unipi=debug")),
            )
            .with_test_writer()
            .init();
    });
}
