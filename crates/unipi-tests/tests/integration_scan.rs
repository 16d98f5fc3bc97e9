// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Scan loop integration: command round trips, change events, coalescing
//! and degraded-transport handling, all against the mock transport with
//! virtual time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{advance, Instant};

use unipi_config::Config;
use unipi_core::command::PendingCommand;
use unipi_core::types::{BlockKind, FeatureValue};
use unipi_modbus::TransportStatus;
use unipi_mqtt::{TopicRoot, TopicRouter};
use unipi_tests::common::{init_test_logging, Harness, WriteKind};

fn config() -> Config {
    Config {
        device_name: "unipi".to_string(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn initial_scan_reports_every_feature_once() {
    init_test_logging();
    let mut harness = Harness::start(&config());

    let event = harness.expect_event("di_1_01").await;
    assert_eq!(event.old, None);
    assert_eq!(event.new, FeatureValue::Bool(false));

    let event = harness.expect_event("ro_2_04").await;
    assert_eq!(event.old, None);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn digital_input_change_is_published() {
    init_test_logging();
    let mut harness = Harness::start(&config());

    // Drain the initial event first.
    harness.expect_event("di_1_03").await;

    // Flip DI 1.3 (bit 2 of register 0) on the hardware.
    harness.mock.set_register(0, BlockKind::Holding, 0, 0b0100);

    let event = harness.expect_event("di_1_03").await;
    assert_eq!(event.old, Some(FeatureValue::Bool(false)));
    assert_eq!(event.new, FeatureValue::Bool(true));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn relay_set_round_trip_via_router() {
    init_test_logging();
    let mut harness = Harness::start(&config());
    harness.expect_event("ro_2_01").await;

    let topics = TopicRoot::new("unipi");
    let router = TopicRouter::new(
        &topics,
        Arc::clone(&harness.registry),
        HashMap::from([(harness.transport_id.clone(), harness.commands.clone())]),
        Vec::new(),
    );

    // Scenario: publish ON to the /set topic; the retained state follows
    // from the next scan's read-back, within two scan intervals.
    let before = Instant::now();
    router.dispatch("unipi/relay/ro_2_01/set", b"ON").await;

    let event = harness.expect_event("ro_2_01").await;
    assert_eq!(event.new, FeatureValue::Bool(true));
    // Two scan intervals, plus slack for the queue hand-off.
    assert!(before.elapsed() <= Duration::from_millis(500));
    assert!(harness.mock.coil(0, 8));

    router.dispatch("unipi/relay/ro_2_01/set", b"OFF").await;
    let event = harness.expect_event("ro_2_01").await;
    assert_eq!(event.new, FeatureValue::Bool(false));
    assert!(!harness.mock.coil(0, 8));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_submissions_coalesce_to_one_write() {
    init_test_logging();
    let mut harness = Harness::start(&config());
    harness.expect_event("ro_2_02").await;
    harness.mock.clear_history();

    // Three values for the same output inside one scan interval.
    let _ = harness.commands.submit(PendingCommand::set_coil(0, 9, true));
    let _ = harness.commands.submit(PendingCommand::set_coil(0, 9, false));
    let handle = harness.commands.submit(PendingCommand::set_coil(0, 9, true));

    assert!(handle.wait().await.is_ok());
    advance(Duration::from_secs(1)).await;

    let writes: Vec<_> = harness
        .mock
        .history()
        .into_iter()
        .filter(|w| w.kind == WriteKind::Coil && w.address == 9)
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].value, 1);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn degraded_transport_goes_offline_and_recovers() {
    init_test_logging();
    let mut harness = Harness::start(&config());
    harness.expect_event("di_1_01").await;

    harness.mock.fail_reads(true);

    let status = tokio::time::timeout(Duration::from_secs(120), harness.transport_status.recv())
        .await
        .expect("offline within budget")
        .expect("status channel open");
    assert_eq!(status, TransportStatus::Offline(harness.transport_id.clone()));

    harness.mock.fail_reads(false);

    let status = tokio::time::timeout(Duration::from_secs(120), harness.transport_status.recv())
        .await
        .expect("online within budget")
        .expect("status channel open");
    assert_eq!(status, TransportStatus::Online(harness.transport_id.clone()));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn write_failure_fails_the_handle() {
    init_test_logging();
    let mut harness = Harness::start(&config());
    harness.expect_event("ro_2_01").await;

    harness.mock.fail_next_write();
    let handle = harness.commands.submit(PendingCommand::set_coil(0, 8, true));
    assert!(handle.wait().await.is_err());

    harness.stop().await;
}
