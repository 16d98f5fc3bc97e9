// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration test harness.
//!
//! Wires the standard test board into a real scan loop over the mock
//! transport, with real command queues and event channels. Cover
//! controllers can be attached on top. Designed for paused-time tests
//! (`#[tokio::test(start_paused = true)]`): all timing is virtual and
//! deterministic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use unipi_config::{Config, CoverConfig};
use unipi_core::cache::RegisterCache;
use unipi_core::command::{CommandQueue, CommandSender};
use unipi_core::event::{self, FeatureChanged};
use unipi_core::features::FeatureRegistry;
use unipi_core::types::TransportId;
use unipi_covers::{Cover, CoverCommand, CoverController, CoverStatus, PositionStore, RelayBinding};
use unipi_modbus::{PollerSettings, ScanLoop, TransportStatus};

use super::builders::{map_test_board_coils, test_registry, test_unit};
use super::mocks::{MockHandle, MockTransport};

/// Default virtual-time budget for wait helpers.
const WAIT_BUDGET: Duration = Duration::from_secs(120);

// =============================================================================
// Harness
// =============================================================================

/// A running scan loop over the standard test board.
pub struct Harness {
    /// The transport id (`tcp`).
    pub transport_id: TransportId,
    /// The shared register cache.
    pub cache: Arc<RegisterCache>,
    /// The feature registry.
    pub registry: Arc<FeatureRegistry>,
    /// Scripting/assertion handle of the mock transport.
    pub mock: MockHandle,
    /// Command sender of the scan loop's queue.
    pub commands: CommandSender,
    /// Feature change events.
    pub events: mpsc::Receiver<FeatureChanged>,
    /// Transport availability transitions.
    pub transport_status: mpsc::UnboundedReceiver<TransportStatus>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Starts the harness with the default 200 ms scan interval.
    pub fn start(config: &Config) -> Self {
        Self::start_with_interval(config, Duration::from_millis(200))
    }

    /// Starts the harness with an explicit scan interval.
    pub fn start_with_interval(config: &Config, scan_interval: Duration) -> Self {
        let transport_id = TransportId::new("tcp");
        let cache = Arc::new(RegisterCache::new());
        let registry = Arc::new(test_registry(&transport_id, config));

        let (transport, mock) = MockTransport::new(transport_id.as_str());
        map_test_board_coils(&mock);

        let settings = PollerSettings::tcp().with_scan_interval(scan_interval);
        let (commands, command_queue) = CommandQueue::channel(settings.command_timeout());
        let (events_tx, events) = event::channel(256);
        let (status_tx, transport_status) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);

        let scan_loop = ScanLoop::new(
            Box::new(transport),
            vec![test_unit(&transport_id)],
            Arc::clone(&cache),
            Arc::clone(&registry),
            events_tx,
            command_queue,
            status_tx,
            settings,
        );
        let tasks = vec![tokio::spawn(scan_loop.run(shutdown.subscribe()))];

        Self {
            transport_id,
            cache,
            registry,
            mock,
            commands,
            events,
            transport_status,
            shutdown,
            tasks,
        }
    }

    /// Attaches a cover controller driving `ro_2_01` (up) / `ro_2_02`
    /// (down). Coils 8 and 9 are registered as an exclusive pair on the
    /// mock.
    pub fn spawn_cover(
        &mut self,
        cover_config: &CoverConfig,
        store: PositionStore,
    ) -> (mpsc::Sender<CoverCommand>, mpsc::UnboundedReceiver<CoverStatus>) {
        self.mock.exclusive_coils(0, 8, 9);

        let up = self
            .registry
            .by_output_circuit(&cover_config.cover_up)
            .expect("up relay resolves");
        let down = self
            .registry
            .by_output_circuit(&cover_config.cover_down)
            .expect("down relay resolves");

        let cover = Cover::new(
            cover_config.id.clone(),
            cover_config.device_class,
            cover_config.run_time(),
            cover_config.tilt_time(),
        );

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (controller, mailbox) = CoverController::new(
            cover,
            RelayBinding::new(Arc::clone(up), self.commands.clone()),
            RelayBinding::new(Arc::clone(down), self.commands.clone()),
            Arc::clone(&self.cache),
            store,
            status_tx,
        );

        self.tasks
            .push(tokio::spawn(controller.run(self.shutdown.subscribe())));
        (mailbox, status_rx)
    }

    /// Waits for the next change event of one feature, skipping others.
    pub async fn expect_event(&mut self, feature_id: &str) -> FeatureChanged {
        let wait = async {
            loop {
                let event = self.events.recv().await.expect("event channel open");
                if event.feature_id.as_str() == feature_id {
                    return event;
                }
            }
        };
        tokio::time::timeout(WAIT_BUDGET, wait)
            .await
            .unwrap_or_else(|_| panic!("no event for {feature_id} within budget"))
    }

    /// Initiates shutdown and waits for all tasks.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

// =============================================================================
// Status helpers
// =============================================================================

/// Waits until a cover status matching the predicate arrives.
pub async fn wait_for_status(
    rx: &mut mpsc::UnboundedReceiver<CoverStatus>,
    predicate: impl Fn(&CoverStatus) -> bool,
) -> CoverStatus {
    let wait = async {
        loop {
            let status = rx.recv().await.expect("status channel open");
            if predicate(&status) {
                return status;
            }
        }
    };
    tokio::time::timeout(WAIT_BUDGET, wait)
        .await
        .expect("no matching cover status within budget")
}
