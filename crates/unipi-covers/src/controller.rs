// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cover controller task.
//!
//! One task per configured cover. The controller consumes commands from its
//! mailbox, sequences the UP/DOWN relay writes around the pure state machine
//! in [`crate::cover`], and reports status changes to the MQTT publisher.
//!
//! Electrical safety rules enforced here:
//!
//! - Before energizing either relay the other relay's cached value is
//!   re-read; if it reads ON a clear is issued first, followed by a 100 ms
//!   delay. If the cache still reads ON after that, the move is aborted.
//! - At most one relay of the pair is ever commanded on.
//! - Reversing direction keeps both relays de-energized for at least 500 ms.
//! - Any relay write error while moving quiesces the motor (both relays
//!   cleared) before the failure is logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use unipi_core::cache::RegisterCache;
use unipi_core::command::CommandSender;
use unipi_core::error::{CommandError, CoverError};
use unipi_core::features::Feature;
use unipi_core::types::FeatureValue;

use crate::cover::{Cover, CoverCommand, CoverDeviceClass, CoverState, Direction, MotionPlan};
use crate::persistence::{PersistedCoverState, PositionStore, Restored};

/// Mandatory both-relays-off window on direction reversal.
pub const DEAD_TIME: Duration = Duration::from_millis(500);
/// Delay after clearing an unexpectedly-on opposite relay.
const INTERLOCK_DELAY: Duration = Duration::from_millis(100);
/// Position integration tick while moving.
const TICK: Duration = Duration::from_secs(1);
/// Mailbox depth per cover.
const MAILBOX_CAPACITY: usize = 16;

// =============================================================================
// CoverStatus
// =============================================================================

/// Status snapshot sent to the MQTT publisher on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverStatus {
    /// Cover id (topic segment).
    pub id: String,
    /// Device class (topic segment).
    pub device_class: CoverDeviceClass,
    /// Current state.
    pub state: CoverState,
    /// Rounded position, when tracked.
    pub position: Option<u8>,
    /// Rounded tilt, when supported.
    pub tilt: Option<u8>,
}

// =============================================================================
// RelayBinding
// =============================================================================

/// One relay of a cover: the resolved output feature plus the command
/// sender of the transport that owns it.
#[derive(Clone)]
pub struct RelayBinding {
    feature: Arc<Feature>,
    commands: CommandSender,
}

impl RelayBinding {
    /// Creates a binding.
    pub fn new(feature: Arc<Feature>, commands: CommandSender) -> Self {
        Self { feature, commands }
    }

    /// The bound feature.
    pub fn feature(&self) -> &Arc<Feature> {
        &self.feature
    }

    /// Writes the relay and waits for the physical write to complete.
    async fn set(&self, on: bool) -> Result<(), CommandError> {
        let command = self.feature.encode_write(FeatureValue::Bool(on))?;
        self.commands.submit(command).wait().await
    }

    /// Reads the relay's last scanned value from the cache.
    fn is_on(&self, cache: &RegisterCache) -> Option<bool> {
        self.feature.decode(cache).and_then(|v| v.as_bool())
    }
}

// =============================================================================
// CoverController
// =============================================================================

/// Drives one cover.
pub struct CoverController {
    cover: Cover,
    up: RelayBinding,
    down: RelayBinding,
    cache: Arc<RegisterCache>,
    store: PositionStore,
    mailbox: mpsc::Receiver<CoverCommand>,
    status_tx: mpsc::UnboundedSender<CoverStatus>,
    last_status: Option<CoverStatus>,
    /// Direction and clear time of the last finished motion, for dead time.
    last_motion: Option<(Direction, Instant)>,
    /// A move waiting out the reversal dead time.
    pending: Option<(MotionPlan, Instant)>,
}

impl CoverController {
    /// Creates a controller, restoring the cover's position from the store.
    ///
    /// Returns the controller and the mailbox sender the MQTT router uses.
    pub fn new(
        mut cover: Cover,
        up: RelayBinding,
        down: RelayBinding,
        cache: Arc<RegisterCache>,
        store: PositionStore,
        status_tx: mpsc::UnboundedSender<CoverStatus>,
    ) -> (Self, mpsc::Sender<CoverCommand>) {
        if cover.device_class().tracks_position() {
            match store.load(cover.id()) {
                Restored::State(state) => cover.restore(state.position, state.tilt, state.state),
                Restored::NeedsCalibration => {
                    tracing::info!(cover = cover.id(), "No usable position, calibrating");
                    cover.begin_calibration();
                }
                Restored::AssumeClosed => cover.restore(0, 0, CoverState::Closed),
            }
        }

        let (tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        (
            Self {
                cover,
                up,
                down,
                cache,
                store,
                mailbox,
                status_tx,
                last_status: None,
                last_motion: None,
                pending: None,
            },
            tx,
        )
    }

    /// Runs until shutdown. Entering calibration issues the full-open drive
    /// immediately.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.cover.is_calibrating() {
            if let Some(plan) = self.cover.plan_open(100) {
                self.start_motion(plan).await;
            }
        }
        self.send_status();

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                _ = shutdown.recv() => {
                    self.quiesce().await;
                    break;
                }
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.quiesce().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
                _ = tokio::time::sleep(TICK), if self.cover.is_moving() => {
                    if self.cover.update(Instant::now()) {
                        self.finish_motion().await;
                    }
                    self.send_status();
                }
            }
        }

        tracing::info!(cover = self.cover.id(), "Cover controller stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let motion = self.cover.deadline();
        let resume = self.pending.as_ref().map(|(_, at)| *at);
        match (motion, resume) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();

        if let Some((plan, resume_at)) = self.pending {
            if resume_at <= now {
                self.pending = None;
                self.start_motion(plan).await;
                return;
            }
        }

        if self.cover.is_moving() && self.cover.update(now) {
            self.finish_motion().await;
        }
        self.send_status();
    }

    async fn handle_command(&mut self, command: CoverCommand) {
        if self.cover.is_calibrating() {
            // Only OPEN is accepted during calibration; it (re)starts the
            // full-open drive.
            match command {
                CoverCommand::Open => {
                    if !self.cover.is_moving() {
                        if let Some(plan) = self.cover.plan_open(100) {
                            self.request_move(plan).await;
                        }
                    }
                }
                other => {
                    tracing::debug!(cover = self.cover.id(), ?other, "Ignored while calibrating");
                }
            }
            return;
        }

        // Plan against the freshly integrated position, not the last tick's.
        self.cover.update(Instant::now());

        match command {
            CoverCommand::Open => {
                if let Some(plan) = self.cover.plan_open(100) {
                    self.request_move(plan).await;
                }
            }
            CoverCommand::Close => {
                if let Some(plan) = self.cover.plan_close(0) {
                    self.request_move(plan).await;
                }
            }
            CoverCommand::Stop => {
                self.pending = None;
                if self.cover.is_moving() {
                    self.finish_motion().await;
                }
            }
            CoverCommand::SetPosition(target) => {
                if let Some(plan) = self.cover.plan_position(target) {
                    self.request_move(plan).await;
                }
            }
            CoverCommand::SetTilt(target) => {
                if self.cover.is_moving() {
                    tracing::debug!(cover = self.cover.id(), "Tilt command ignored while moving");
                    return;
                }
                if let Some(plan) = self.cover.plan_tilt(target) {
                    self.request_move(plan).await;
                }
            }
        }
    }

    /// Routes a planned move through re-targeting, reversal dead time or a
    /// direct start.
    async fn request_move(&mut self, plan: MotionPlan) {
        let now = Instant::now();
        self.pending = None;

        match self.cover.motion_direction() {
            Some(direction) if direction == plan.direction => {
                // Same direction: re-plan from the integrated position, the
                // relay stays energized.
                self.cover.update(now);
                self.cover.start(now, plan);
                self.send_status();
            }
            Some(_) => {
                // Reversal: stop, then wait out the dead time.
                self.finish_motion().await;
                self.pending = Some((plan, Instant::now() + DEAD_TIME));
            }
            None => {
                // From rest: a reversal against the previous motion still
                // honors the remaining dead time.
                let resume_at = match self.last_motion {
                    Some((last, cleared_at)) if last != plan.direction => cleared_at + DEAD_TIME,
                    _ => now,
                };
                if resume_at > now {
                    self.pending = Some((plan, resume_at));
                } else {
                    self.start_motion(plan).await;
                }
            }
        }
    }

    /// Performs the interlock sequence and energizes the relay for `plan`.
    async fn start_motion(&mut self, plan: MotionPlan) {
        let (active, opposite) = match plan.direction {
            Direction::Up => (self.up.clone(), self.down.clone()),
            Direction::Down => (self.down.clone(), self.up.clone()),
        };

        // Interlock: the opposite relay must read OFF before we energize.
        if opposite.is_on(&self.cache) == Some(true) {
            if let Err(error) = opposite.set(false).await {
                let error = self.relay_error(error);
                tracing::warn!(%error, "Interlock clear failed");
                self.quiesce().await;
                return;
            }
            tokio::time::sleep(INTERLOCK_DELAY).await;

            if opposite.is_on(&self.cache) == Some(true) {
                let error = CoverError::SafetyViolation {
                    cover: self.cover.id().to_string(),
                };
                tracing::error!(cover = self.cover.id(), %error, "Aborting move");
                self.quiesce().await;
                return;
            }
        }

        if let Err(error) = active.set(true).await {
            let error = self.relay_error(error);
            tracing::warn!(%error, "Relay energize failed");
            self.quiesce().await;
            return;
        }

        self.cover.start(Instant::now(), plan);
        self.persist();
        self.send_status();
    }

    /// Stops the active motion: clears the energized relay, settles the
    /// state machine and persists the resting state.
    async fn finish_motion(&mut self) {
        let Some(direction) = self.cover.motion_direction() else {
            return;
        };
        let active = match direction {
            Direction::Up => self.up.clone(),
            Direction::Down => self.down.clone(),
        };

        let cleared_at = Instant::now();
        if let Err(error) = active.set(false).await {
            let error = self.relay_error(error);
            tracing::warn!(%error, "Relay clear failed");
            self.quiesce().await;
            return;
        }

        self.cover.halt(Instant::now());
        self.last_motion = Some((direction, cleared_at));
        self.persist();
        self.send_status();
    }

    /// Emergency stop: clears both relays unconditionally.
    async fn quiesce(&mut self) {
        let direction = self.cover.motion_direction();

        for relay in [&self.up, &self.down] {
            if let Err(error) = relay.set(false).await {
                let error = self.relay_error(error);
                tracing::error!(
                    relay = %relay.feature().id,
                    %error,
                    "Relay clear failed during quiesce"
                );
            }
        }

        if let Some(direction) = direction {
            self.last_motion = Some((direction, Instant::now()));
        }
        self.cover.halt(Instant::now());
        self.persist();
        self.send_status();
    }

    fn relay_error(&self, error: CommandError) -> CoverError {
        CoverError::RelayWrite {
            cover: self.cover.id().to_string(),
            message: error.to_string(),
        }
    }

    fn persist(&self) {
        if !self.cover.device_class().tracks_position() {
            return;
        }
        let state = PersistedCoverState {
            position: self.cover.position().unwrap_or(0),
            tilt: self.cover.tilt().unwrap_or(0),
            state: self.cover.state(),
            written_at: chrono::Utc::now(),
        };
        if let Err(source) = self.store.save(self.cover.id(), &state) {
            let error = CoverError::Persist {
                cover: self.cover.id().to_string(),
                source,
            };
            tracing::error!(%error, "Cover state not persisted");
        }
    }

    fn send_status(&mut self) {
        let status = CoverStatus {
            id: self.cover.id().to_string(),
            device_class: self.cover.device_class(),
            state: self.cover.state(),
            position: self.cover.position(),
            tilt: self.cover.tilt(),
        };
        if self.last_status.as_ref() != Some(&status) {
            self.last_status = Some(status.clone());
            let _ = self.status_tx.send(status);
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Controller behavior is covered end-to-end in the unipi-tests crate,
    // where a scripted transport executes the command queue. The tests here
    // exercise the pieces that need no I/O.

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Down.opposite(), Direction::Up);
    }

    #[test]
    fn test_status_equality_drives_dedup() {
        let a = CoverStatus {
            id: "x".into(),
            device_class: CoverDeviceClass::Blind,
            state: CoverState::Stopped,
            position: Some(10),
            tilt: Some(0),
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.position = Some(11);
        assert_ne!(a, b);
    }
}
