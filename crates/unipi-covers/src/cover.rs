// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cover state machine and time-based position estimation.
//!
//! A [`Cover`] tracks the estimated position and tilt of a motorized window
//! covering driven by two relays. Position is a float in `[0, 100]` where
//! 100 is fully open; it is integrated over wall-clock time while the motor
//! runs. Tilt (blinds only) swings at the start of every motion, before the
//! position starts to change.
//!
//! This type is pure: it never touches relays. The controller performs the
//! relay sequencing (interlock, dead time) around the planning and
//! integration methods here.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// =============================================================================
// CoverState
// =============================================================================

/// Cover state as published on the `state` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverState {
    /// Fully open, at rest.
    Open,
    /// Fully closed, at rest.
    Closed,
    /// Motor running towards open.
    Opening,
    /// Motor running towards closed.
    Closing,
    /// At rest between the limits.
    Stopped,
}

impl CoverState {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverState::Open => "open",
            CoverState::Closed => "closed",
            CoverState::Opening => "opening",
            CoverState::Closing => "closing",
            CoverState::Stopped => "stopped",
        }
    }

    /// Returns `true` while the motor runs.
    #[inline]
    pub fn is_moving(&self) -> bool {
        matches!(self, CoverState::Opening | CoverState::Closing)
    }
}

impl fmt::Display for CoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// CoverDeviceClass
// =============================================================================

/// Cover device classes with their capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverDeviceClass {
    /// Venetian blind: position and tilt.
    Blind,
    /// Roller shutter: open/close/stop only, no position estimate.
    RollerShutter,
    /// Garage door: position, no tilt.
    GarageDoor,
}

impl CoverDeviceClass {
    /// Returns `true` if this class tracks a position estimate.
    pub fn tracks_position(&self) -> bool {
        matches!(self, CoverDeviceClass::Blind | CoverDeviceClass::GarageDoor)
    }

    /// Returns `true` if this class supports tilt.
    pub fn supports_tilt(&self) -> bool {
        matches!(self, CoverDeviceClass::Blind)
    }

    /// Returns the wire representation used in topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverDeviceClass::Blind => "blind",
            CoverDeviceClass::RollerShutter => "roller_shutter",
            CoverDeviceClass::GarageDoor => "garage_door",
        }
    }
}

impl fmt::Display for CoverDeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Direction & commands
// =============================================================================

/// Motor direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards open (`cover_up` relay).
    Up,
    /// Towards closed (`cover_down` relay).
    Down,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// A command accepted by a cover controller mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverCommand {
    /// `OPEN` on the `/set` topic.
    Open,
    /// `CLOSE` on the `/set` topic.
    Close,
    /// `STOP` on the `/set` topic.
    Stop,
    /// Integer on `/position/set`.
    SetPosition(u8),
    /// Integer on `/tilt/set`.
    SetTilt(u8),
}

// =============================================================================
// Motion
// =============================================================================

/// A planned motor run, produced by the planning methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionPlan {
    /// Relay to energize.
    pub direction: Direction,
    /// Tilt value the swing phase moves toward.
    tilt_target: Option<f64>,
    /// Position the travel phase moves toward (`None` for tilt-only runs
    /// and for covers without position tracking).
    position_target: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    direction: Direction,
    started_at: Instant,
    start_position: Option<f64>,
    start_tilt: Option<f64>,
    tilt_target: Option<f64>,
    /// Duration of the initial tilt swing (zero without tilt).
    tilt_phase: Duration,
    position_target: Option<f64>,
    /// Total run duration. `None` runs until STOP.
    stop_after: Option<Duration>,
}

// =============================================================================
// Cover
// =============================================================================

/// Time-driven position estimator for one cover.
#[derive(Debug)]
pub struct Cover {
    id: String,
    device_class: CoverDeviceClass,
    run_time: Duration,
    tilt_time: Option<Duration>,
    state: CoverState,
    position: Option<f64>,
    tilt: Option<f64>,
    calibrating: bool,
    motion: Option<Motion>,
}

impl Cover {
    /// Creates a cover at an unknown position.
    ///
    /// `tilt_time` is honored only for device classes that support tilt.
    pub fn new(
        id: impl Into<String>,
        device_class: CoverDeviceClass,
        run_time: Duration,
        tilt_time: Option<Duration>,
    ) -> Self {
        Self {
            id: id.into(),
            device_class,
            run_time,
            tilt_time: tilt_time.filter(|_| device_class.supports_tilt()),
            state: CoverState::Stopped,
            position: None,
            tilt: None,
            calibrating: false,
            motion: None,
        }
    }

    /// Restores position, tilt and state from persistence.
    pub fn restore(&mut self, position: u8, tilt: u8, state: CoverState) {
        if self.device_class.tracks_position() {
            self.position = Some(f64::from(position.min(100)));
            self.tilt = self
                .tilt_time
                .map(|_| f64::from(tilt.min(100)));
        }
        self.state = match state {
            CoverState::Opening | CoverState::Closing => CoverState::Stopped,
            other => other,
        };
    }

    /// Puts the cover in calibration mode: position is treated as fully
    /// closed and only a full open is accepted until the run completes.
    pub fn begin_calibration(&mut self) {
        if self.device_class.tracks_position() {
            self.calibrating = true;
            self.position = Some(0.0);
            self.tilt = self.tilt_time.map(|_| 0.0);
            self.state = CoverState::Stopped;
        }
    }

    /// The cover id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The device class.
    pub fn device_class(&self) -> CoverDeviceClass {
        self.device_class
    }

    /// The current state.
    pub fn state(&self) -> CoverState {
        self.state
    }

    /// `true` while a motor run is active.
    pub fn is_moving(&self) -> bool {
        self.motion.is_some()
    }

    /// `true` while calibrating.
    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// The published integer position (100 = fully open).
    pub fn position(&self) -> Option<u8> {
        self.position.map(|p| p.round() as u8)
    }

    /// The published integer tilt.
    pub fn tilt(&self) -> Option<u8> {
        self.tilt.map(|t| t.round() as u8)
    }

    /// The direction of the active motion, if any.
    pub fn motion_direction(&self) -> Option<Direction> {
        self.motion.map(|m| m.direction)
    }

    /// The instant the active motion is due to stop (`None` when idle or
    /// running until STOP).
    pub fn deadline(&self) -> Option<Instant> {
        let motion = self.motion.as_ref()?;
        motion.stop_after.map(|d| motion.started_at + d)
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Plans an open run toward `target` (100 = fully open).
    ///
    /// Returns `None` when no motor run is needed: the cover is already at
    /// or beyond the target, or calibration blocks the command.
    pub fn plan_open(&self, target: u8) -> Option<MotionPlan> {
        let target = f64::from(target.min(100));

        if self.calibrating {
            // Calibration always drives fully open from an assumed closed
            // position, regardless of the requested target.
            return Some(MotionPlan {
                direction: Direction::Up,
                tilt_target: self.tilt_time.map(|_| 100.0),
                position_target: Some(100.0),
            });
        }

        if self.device_class.tracks_position() {
            let position = self.position?;
            if position >= target {
                return None;
            }
            Some(MotionPlan {
                direction: Direction::Up,
                tilt_target: self.tilt_time.map(|_| 100.0),
                position_target: Some(target),
            })
        } else {
            Some(MotionPlan {
                direction: Direction::Up,
                tilt_target: None,
                position_target: None,
            })
        }
    }

    /// Plans a close run toward `target` (0 = fully closed).
    pub fn plan_close(&self, target: u8) -> Option<MotionPlan> {
        if self.calibrating {
            return None;
        }
        let target = f64::from(target.min(100));

        if self.device_class.tracks_position() {
            let position = self.position?;
            if position <= target {
                return None;
            }
            Some(MotionPlan {
                direction: Direction::Down,
                tilt_target: self.tilt_time.map(|_| 0.0),
                position_target: Some(target),
            })
        } else {
            Some(MotionPlan {
                direction: Direction::Down,
                tilt_target: None,
                position_target: None,
            })
        }
    }

    /// Plans a run toward an absolute position.
    pub fn plan_position(&self, target: u8) -> Option<MotionPlan> {
        if self.calibrating || !self.device_class.tracks_position() {
            return None;
        }
        let position = self.position?;
        let target_f = f64::from(target.min(100));
        if target_f > position {
            self.plan_open(target)
        } else if target_f < position {
            self.plan_close(target)
        } else {
            None
        }
    }

    /// Plans a tilt-only run toward an absolute tilt.
    pub fn plan_tilt(&self, target: u8) -> Option<MotionPlan> {
        if self.calibrating {
            return None;
        }
        self.tilt_time?;
        let tilt = self.tilt?;
        let target = f64::from(target.min(100));

        if target > tilt {
            Some(MotionPlan {
                direction: Direction::Up,
                tilt_target: Some(target),
                position_target: None,
            })
        } else if target < tilt {
            Some(MotionPlan {
                direction: Direction::Down,
                tilt_target: Some(target),
                position_target: None,
            })
        } else {
            None
        }
    }

    // =========================================================================
    // Motion lifecycle
    // =========================================================================

    /// Commits a planned run. Call after the relay has been energized.
    pub fn start(&mut self, now: Instant, plan: MotionPlan) {
        let tilt_phase = match (self.tilt_time, plan.tilt_target, self.tilt) {
            (Some(tilt_time), Some(target), Some(tilt)) => {
                tilt_time.mul_f64((target - tilt).abs() / 100.0)
            }
            _ => Duration::ZERO,
        };

        let travel = match (plan.position_target, self.position) {
            (Some(target), Some(position)) => {
                Some(self.run_time.mul_f64((target - position).abs() / 100.0))
            }
            _ => None,
        };

        let stop_after = match (plan.position_target, travel) {
            // Position run: swing plus travel.
            (Some(_), Some(travel)) => Some(tilt_phase + travel),
            // Tilt-only run.
            (None, _) if plan.tilt_target.is_some() => Some(tilt_phase),
            // No position tracking: run until STOP.
            _ => None,
        };

        self.motion = Some(Motion {
            direction: plan.direction,
            started_at: now,
            start_position: self.position,
            start_tilt: self.tilt,
            tilt_target: plan.tilt_target,
            tilt_phase,
            position_target: plan.position_target,
            stop_after,
        });

        self.state = match plan.direction {
            Direction::Up => CoverState::Opening,
            Direction::Down => CoverState::Closing,
        };
    }

    /// Integrates position and tilt up to `now`. Returns `true` when the
    /// active motion has completed (deadline reached or a limit hit).
    pub fn update(&mut self, now: Instant) -> bool {
        let Some(motion) = self.motion else {
            return false;
        };

        let elapsed = now.saturating_duration_since(motion.started_at);

        // Tilt swing phase.
        if let (Some(start_tilt), Some(target)) = (motion.start_tilt, motion.tilt_target) {
            if motion.tilt_phase.is_zero() {
                self.tilt = Some(target);
            } else {
                let progress =
                    (elapsed.as_secs_f64() / motion.tilt_phase.as_secs_f64()).min(1.0);
                self.tilt = Some(start_tilt + (target - start_tilt) * progress);
            }
        }

        // Position travel phase.
        if let (Some(start_position), Some(_)) = (motion.start_position, motion.position_target) {
            let travel_elapsed = elapsed.saturating_sub(motion.tilt_phase);
            let delta = 100.0 * travel_elapsed.as_secs_f64() / self.run_time.as_secs_f64();
            let position = match motion.direction {
                Direction::Up => start_position + delta,
                Direction::Down => start_position - delta,
            };
            self.position = Some(position.clamp(0.0, 100.0));
        }

        let deadline_hit = motion
            .stop_after
            .is_some_and(|stop_after| elapsed >= stop_after);
        let limit_hit = match (motion.direction, self.position) {
            (Direction::Up, Some(p)) => p >= 100.0,
            (Direction::Down, Some(p)) => p <= 0.0,
            _ => false,
        };

        deadline_hit || limit_hit
    }

    /// Stops the active motion: integrates up to `now`, resolves the resting
    /// state and completes calibration when fully open.
    pub fn halt(&mut self, now: Instant) {
        self.update(now);
        self.motion = None;

        if self.calibrating {
            if self.position.is_some_and(|p| p >= 100.0) {
                self.calibrating = false;
                self.tilt = self.tilt_time.map(|_| 100.0);
            } else {
                // The calibration drive was interrupted; the position is
                // still unknown and the next OPEN restarts it.
                self.position = Some(0.0);
                self.state = CoverState::Stopped;
                return;
            }
        }

        self.state = if self.device_class.tracks_position() {
            match self.position {
                Some(p) if p <= 0.0 => CoverState::Closed,
                Some(p) if p >= 100.0 => CoverState::Open,
                _ => CoverState::Stopped,
            }
        } else {
            CoverState::Stopped
        };
    }
}

// =============================================================================
// Tests
// =============================================================================
