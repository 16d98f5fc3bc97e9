// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cover controller integration against a real scan loop and command queue.
//!
//! Covers the relay-safety rules (exclusive pair, reversal dead time), the
//! timed position/tilt model, persistence across restarts and crash
//! recovery via calibration. All timing is virtual.

use std::time::Duration;

use tokio::time::Instant;

use unipi_config::{Config, CoverConfig};
use unipi_covers::{
    CoverCommand, CoverDeviceClass, CoverState, PersistedCoverState, PositionStore, Restored,
};
use unipi_tests::common::{init_test_logging, wait_for_status, Harness};

fn config() -> Config {
    Config {
        device_name: "unipi".to_string(),
        ..Default::default()
    }
}

fn blind() -> CoverConfig {
    CoverConfig {
        id: "living-room".to_string(),
        friendly_name: Some("Living room blind".to_string()),
        device_class: CoverDeviceClass::Blind,
        cover_run_time: 30.0,
        tilt_change_time: Some(1.5),
        cover_up: "ro_2_01".to_string(),
        cover_down: "ro_2_02".to_string(),
        suggested_area: None,
    }
}

fn store_at(dir: &std::path::Path) -> PositionStore {
    PositionStore::new(dir, true).expect("store creates")
}

fn persist(store: &PositionStore, position: u8, tilt: u8, state: CoverState) {
    store
        .save(
            "living-room",
            &PersistedCoverState {
                position,
                tilt,
                state,
                written_at: chrono_now(),
            },
        )
        .expect("state saves");
}

// The controller stamps real wall-clock time; for fixtures any value works.
fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

const UP_COIL: u16 = 8;
const DOWN_COIL: u16 = 9;

#[tokio::test(start_paused = true)]
async fn open_blind_from_closed() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 0, 0, CoverState::Closed);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store.clone());

    let initial = wait_for_status(&mut status_rx, |_| true).await;
    assert_eq!(initial.state, CoverState::Closed);
    assert_eq!(initial.position, Some(0));

    let started = Instant::now();
    mailbox.send(CoverCommand::Open).await.unwrap();

    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Opening).await;
    assert_eq!(status.position, Some(0));
    // The up relay energizes well within one scan interval.
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(harness.mock.coil(0, UP_COIL));

    // Tilt swings to fully open first.
    let status = wait_for_status(&mut status_rx, |s| s.tilt == Some(100)).await;
    assert_eq!(status.state, CoverState::Opening);
    assert!(status.position.unwrap() < 100);

    // Then the position travels; full open = tilt swing + full travel.
    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Open).await;
    assert_eq!(status.position, Some(100));
    assert_eq!(status.tilt, Some(100));

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(31_000), "took {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(33_000), "took {elapsed:?}");
    assert!(!harness.mock.coil(0, UP_COIL));
    assert!(!harness.mock.exclusive_violation());

    // Persisted on the transition into Open.
    match store.load("living-room") {
        Restored::State(state) => {
            assert_eq!(state.position, 100);
            assert_eq!(state.state, CoverState::Open);
        }
        other => panic!("unexpected restore: {other:?}"),
    }

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn position_is_monotonic_while_opening() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 0, 0, CoverState::Closed);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);

    mailbox.send(CoverCommand::Open).await.unwrap();

    let mut last = 0u8;
    loop {
        let status = wait_for_status(&mut status_rx, |_| true).await;
        if let Some(position) = status.position {
            assert!(position >= last, "position went backwards");
            assert!(position <= 100);
            last = position;
        }
        if status.state == CoverState::Open {
            break;
        }
    }
    assert_eq!(last, 100);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn mid_motion_reverse_has_dead_time() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 0, 0, CoverState::Closed);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);

    mailbox.send(CoverCommand::Open).await.unwrap();
    wait_for_status(&mut status_rx, |s| s.position.unwrap_or(0) >= 50).await;

    mailbox.send(CoverCommand::Close).await.unwrap();
    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Closing).await;
    assert!(harness.mock.coil(0, DOWN_COIL));
    assert!(!harness.mock.coil(0, UP_COIL));

    // Both relays were off for at least the dead time between directions.
    let up_off = harness
        .mock
        .coil_history(0, UP_COIL)
        .into_iter()
        .filter(|(_, on)| !on)
        .last()
        .expect("up relay was cleared")
        .0;
    let down_on = harness
        .mock
        .coil_history(0, DOWN_COIL)
        .into_iter()
        .filter(|(_, on)| *on)
        .last()
        .expect("down relay was energized")
        .0;
    assert!(down_on.duration_since(up_off) >= Duration::from_millis(500));
    assert!(!harness.mock.exclusive_violation());

    // Position decreases while closing.
    let first = status.position.unwrap_or(100);
    let later = wait_for_status(&mut status_rx, |s| {
        s.position.is_some_and(|p| p < first)
    })
    .await;
    assert_eq!(later.state, CoverState::Closing);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn position_target_stops_at_target() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 100, 100, CoverState::Open);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store.clone());

    mailbox.send(CoverCommand::SetPosition(40)).await.unwrap();
    wait_for_status(&mut status_rx, |s| s.state == CoverState::Closing).await;

    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Stopped).await;
    let position = status.position.unwrap();
    assert!((39..=41).contains(&position), "stopped at {position}");

    // Run time: tilt swing plus 60 % of the travel time.
    let on = harness.mock.coil_history(0, DOWN_COIL)[0].0;
    let off = harness
        .mock
        .coil_history(0, DOWN_COIL)
        .into_iter()
        .find(|(_, state)| !state)
        .expect("down relay cleared")
        .0;
    let run = off.duration_since(on);
    assert!(run >= Duration::from_millis(19_000), "ran {run:?}");
    assert!(run <= Duration::from_millis(20_500), "ran {run:?}");

    match store.load("living-room") {
        Restored::State(state) => assert_eq!(state.position, 40),
        other => panic!("unexpected restore: {other:?}"),
    }

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn position_set_at_limit_is_a_noop() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 100, 100, CoverState::Open);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);
    wait_for_status(&mut status_rx, |_| true).await;
    harness.mock.clear_history();

    mailbox.send(CoverCommand::SetPosition(100)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(harness.mock.coil_history(0, UP_COIL).is_empty());
    assert!(harness.mock.coil_history(0, DOWN_COIL).is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn tilt_only_run_leaves_position() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 50, 0, CoverState::Stopped);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);
    wait_for_status(&mut status_rx, |_| true).await;

    mailbox.send(CoverCommand::SetTilt(100)).await.unwrap();
    let status = wait_for_status(&mut status_rx, |s| {
        s.state == CoverState::Stopped && s.tilt == Some(100)
    })
    .await;

    assert_eq!(status.position, Some(50));
    assert!(!harness.mock.coil(0, UP_COIL));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn persisted_position_survives_restart() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();

    // First run stops somewhere in the middle.
    {
        let store = store_at(dir.path());
        persist(&store, 0, 0, CoverState::Closed);
        let mut harness = Harness::start(&config());
        let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);

        mailbox.send(CoverCommand::Open).await.unwrap();
        wait_for_status(&mut status_rx, |s| s.position.unwrap_or(0) >= 30).await;
        mailbox.send(CoverCommand::Stop).await.unwrap();
        wait_for_status(&mut status_rx, |s| s.state == CoverState::Stopped).await;

        harness.stop().await;
    }

    // Second run restores the position, no calibration drive.
    let store = store_at(dir.path());
    let restored = match store.load("living-room") {
        Restored::State(state) => state,
        other => panic!("unexpected restore: {other:?}"),
    };
    assert!(restored.position >= 30);

    let mut harness = Harness::start(&config());
    let (_mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);

    let initial = wait_for_status(&mut status_rx, |_| true).await;
    assert_eq!(initial.state, CoverState::Stopped);
    assert_eq!(initial.position, Some(restored.position));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(harness.mock.coil_history(0, UP_COIL).is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unclean_shutdown_triggers_calibration() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    // The previous run died while closing at position 62.
    persist(&store, 62, 0, CoverState::Closing);

    let mut harness = Harness::start(&config());
    let started = Instant::now();
    let (_mailbox, mut status_rx) = harness.spawn_cover(&blind(), store.clone());

    // Calibration issues a single full OPEN.
    wait_for_status(&mut status_rx, |s| s.state == CoverState::Opening).await;
    assert!(harness.mock.coil(0, UP_COIL));

    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Open).await;
    assert_eq!(status.position, Some(100));
    assert_eq!(status.tilt, Some(100));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(!harness.mock.coil(0, UP_COIL));

    match store.load("living-room") {
        Restored::State(state) => {
            assert_eq!(state.position, 100);
            assert_eq!(state.state, CoverState::Open);
        }
        other => panic!("unexpected restore: {other:?}"),
    }

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn calibration_ignores_position_commands() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 62, 0, CoverState::Opening);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);
    wait_for_status(&mut status_rx, |s| s.state == CoverState::Opening).await;

    // Ignored while calibrating; the drive continues to full open.
    mailbox.send(CoverCommand::SetPosition(10)).await.unwrap();
    mailbox.send(CoverCommand::Close).await.unwrap();

    let status = wait_for_status(&mut status_rx, |s| !s.state.is_moving()).await;
    assert_eq!(status.state, CoverState::Open);
    assert_eq!(status.position, Some(100));
    assert!(!harness.mock.coil(0, DOWN_COIL));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn relay_write_failure_quiesces_the_motor() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());
    persist(&store, 0, 0, CoverState::Closed);

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&blind(), store);
    wait_for_status(&mut status_rx, |_| true).await;

    harness.mock.fail_next_write();
    mailbox.send(CoverCommand::Open).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // The energize failed; the motor never ran and both relays are clear.
    while let Ok(status) = status_rx.try_recv() {
        assert!(!status.state.is_moving());
    }
    assert!(!harness.mock.coil(0, UP_COIL));
    assert!(!harness.mock.coil(0, DOWN_COIL));
    assert!(!harness.mock.exclusive_violation());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn roller_shutter_runs_until_stop() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(dir.path());

    let shutter = CoverConfig {
        id: "living-room".to_string(),
        device_class: CoverDeviceClass::RollerShutter,
        tilt_change_time: None,
        ..blind()
    };

    let mut harness = Harness::start(&config());
    let (mailbox, mut status_rx) = harness.spawn_cover(&shutter, store);
    wait_for_status(&mut status_rx, |_| true).await;

    mailbox.send(CoverCommand::Open).await.unwrap();
    wait_for_status(&mut status_rx, |s| s.state == CoverState::Opening).await;

    // Far beyond the nominal travel time the motor is still commanded on.
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(harness.mock.coil(0, UP_COIL));

    mailbox.send(CoverCommand::Stop).await.unwrap();
    let status = wait_for_status(&mut status_rx, |s| s.state == CoverState::Stopped).await;
    assert_eq!(status.position, None);
    assert!(!harness.mock.coil(0, UP_COIL));

    harness.stop().await;
}
