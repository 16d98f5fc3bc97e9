// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # unipi-covers
//!
//! Cover control for the Unipi Control daemon: a time-driven position
//! estimator and command sequencer that drives two relays (UP/DOWN) to move
//! a physical cover to a target position or tilt.
//!
//! - **cover**: the pure state machine and position/tilt integration
//! - **controller**: the per-cover task with relay interlocks and dead time
//! - **persistence**: atomic JSON position files and calibration triggering

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod controller;
pub mod cover;
pub mod persistence;

pub use controller::{CoverController, CoverStatus, RelayBinding, DEAD_TIME};
pub use cover::{Cover, CoverCommand, CoverDeviceClass, CoverState, Direction, MotionPlan};
pub use persistence::{PersistedCoverState, PositionStore, Restored};
