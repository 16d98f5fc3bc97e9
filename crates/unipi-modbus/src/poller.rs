// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The Modbus scan loop.
//!
//! One cooperative task per transport. Every scan interval the loop reads
//! each register block in deterministic order, updates the register cache,
//! diffs the decoded feature values against the previous snapshot and emits
//! change events. Pending write commands are interleaved after every few
//! block reads (immediately when a deadline has passed) so writes never
//! starve behind scans and never interleave inside a single transaction.
//!
//! Failure policy: I/O faults count towards the degraded threshold; while
//! degraded the loop polls at the slow interval and the availability topic
//! reads `offline`. Modbus exception replies leave the affected feature's
//! last good value in place and are logged at most once per minute per
//! register.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use unipi_core::cache::RegisterCache;
use unipi_core::command::{CommandKind, CommandQueue, InFlightCommand};
use unipi_core::error::{CommandError, TransportError};
use unipi_core::event::{EventSender, FeatureChanged};
use unipi_core::features::FeatureRegistry;
use unipi_core::types::{BlockKind, RegisterBlock, TransportId, Unit};

use crate::health::{HealthTransition, TransportHealth};
use crate::transport::ModbusTransport;

const EXCEPTION_LOG_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_FLUSH_BUDGET: Duration = Duration::from_secs(2);

// =============================================================================
// Settings
// =============================================================================

/// Scan loop timing parameters.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Poll interval while healthy.
    pub scan_interval: Duration,
    /// Poll interval while degraded.
    pub degraded_interval: Duration,
    /// Number of block reads between write interleave points.
    pub write_interleave: usize,
}

impl PollerSettings {
    /// Defaults for the TCP transport (0.2 s).
    pub fn tcp() -> Self {
        Self {
            scan_interval: Duration::from_millis(200),
            degraded_interval: Duration::from_secs(5),
            write_interleave: 4,
        }
    }

    /// Defaults for serial transports (0.5 s).
    pub fn serial() -> Self {
        Self {
            scan_interval: Duration::from_millis(500),
            ..Self::tcp()
        }
    }

    /// Overrides the healthy scan interval.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Queue timeout for pending commands (spec: 3x the scan interval).
    pub fn command_timeout(&self) -> Duration {
        self.scan_interval * 3
    }
}

// =============================================================================
// TransportStatus
// =============================================================================

/// Availability transition reported to the MQTT plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// Transport recovered; availability goes `online`.
    Online(TransportId),
    /// Transport degraded; availability goes `offline`.
    Offline(TransportId),
}

// =============================================================================
// ScanLoop
// =============================================================================

/// Periodic poller driving one transport.
pub struct ScanLoop {
    transport: Box<dyn ModbusTransport>,
    units: Vec<Unit>,
    cache: Arc<RegisterCache>,
    registry: Arc<FeatureRegistry>,
    events: EventSender,
    commands: CommandQueue,
    status_tx: mpsc::UnboundedSender<TransportStatus>,
    settings: PollerSettings,
    health: TransportHealth,
    exception_log: HashMap<(u8, u16), Instant>,
}

impl ScanLoop {
    /// Creates a scan loop. Registers every block of every unit with the
    /// cache so snapshots exist before the first read.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Box<dyn ModbusTransport>,
        units: Vec<Unit>,
        cache: Arc<RegisterCache>,
        registry: Arc<FeatureRegistry>,
        events: EventSender,
        commands: CommandQueue,
        status_tx: mpsc::UnboundedSender<TransportStatus>,
        settings: PollerSettings,
    ) -> Self {
        for unit in &units {
            for block in &unit.blocks {
                cache.register_block(unit.unit_id, *block);
            }
        }
        Self {
            transport,
            units,
            cache,
            registry,
            events,
            commands,
            status_tx,
            settings,
            health: TransportHealth::new(),
            exception_log: HashMap::new(),
        }
    }

    /// Runs until the shutdown signal fires, then flushes pending writes
    /// within a 2 s budget and closes the transport.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if let Err(error) = self.transport.connect().await {
            tracing::warn!(
                transport = %self.transport.id(),
                %error,
                "Initial connect failed, will retry with backoff"
            );
            self.record_failure();
        }

        loop {
            self.scan_cycle().await;

            let interval = if self.health.is_degraded() {
                self.settings.degraded_interval
            } else {
                self.settings.scan_interval
            };

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        // Graceful stop: keep servicing the queue for the flush budget so
        // late writes (cover relay clears) still reach the hardware, then
        // fail whatever is left.
        let flush_deadline = Instant::now() + SHUTDOWN_FLUSH_BUDGET;
        while Instant::now() < flush_deadline {
            self.commands.pump(Instant::now());
            if self.commands.is_pending() && self.transport.is_connected() {
                self.execute_next_write().await;
            } else {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        self.commands.pump(Instant::now());
        self.commands.drain_failed();
        let _ = self.transport.disconnect().await;

        tracing::info!(transport = %self.transport.id(), "Scan loop stopped");
    }

    /// One pass over all blocks of all units.
    async fn scan_cycle(&mut self) {
        self.commands.pump(Instant::now());

        if !self.transport.is_connected() && !self.try_reconnect().await {
            return;
        }

        let mut reads_since_write = 0usize;
        let units = std::mem::take(&mut self.units);

        'pass: for unit in &units {
            for block in &unit.blocks {
                self.commands.pump(Instant::now());
                if self.commands.has_urgent(Instant::now())
                    || (reads_since_write >= self.settings.write_interleave
                        && self.commands.is_pending())
                {
                    self.execute_next_write().await;
                    reads_since_write = 0;
                }

                if !self.read_block(unit, block).await {
                    // Transport fault; abandon the pass and retry next cycle.
                    break 'pass;
                }
                reads_since_write += 1;
            }
        }

        self.units = units;

        // Writes never starve: drain whatever queued during the pass.
        self.flush_writes().await;
        self.events.flush();
    }

    async fn try_reconnect(&mut self) -> bool {
        let backoff = self.health.next_backoff();
        tokio::time::sleep(backoff).await;

        match self.transport.reconnect().await {
            Ok(()) => {
                // Recovery is declared by the next successful read, not by
                // the connection handshake.
                tracing::info!(transport = %self.transport.id(), "Transport reconnected");
                true
            }
            Err(error) => {
                tracing::debug!(transport = %self.transport.id(), %error, "Reconnect failed");
                self.record_failure();
                false
            }
        }
    }

    /// Reads one block and emits feature diffs. Returns `false` on an I/O
    /// fault that should abort the current pass.
    async fn read_block(&mut self, unit: &Unit, block: &RegisterBlock) -> bool {
        let previous = self.cache.snapshot(unit.unit_id, block);

        let result = match block.kind {
            BlockKind::Holding => {
                self.transport
                    .read_holding(unit.unit_id, block.start, block.count)
                    .await
            }
            BlockKind::Input => {
                self.transport
                    .read_input(unit.unit_id, block.start, block.count)
                    .await
            }
        };

        match result {
            Ok(values) => {
                self.record_success();
                if let Some(update) = self.cache.update_block(unit.unit_id, block, &values) {
                    if update.changed {
                        self.diff_block(unit, block, previous.as_deref(), &values);
                    }
                }
                true
            }
            Err(TransportError::Exception { unit, address, code }) => {
                // The peer answered; the link is fine. The feature keeps its
                // last good value.
                self.log_exception(unit, address, code);
                true
            }
            Err(error) => {
                tracing::debug!(
                    transport = %self.transport.id(),
                    unit = unit.unit_id,
                    start = block.start,
                    %error,
                    "Block read failed"
                );
                self.record_failure();
                if !matches!(error, TransportError::Timeout { .. }) {
                    let _ = self.transport.disconnect().await;
                }
                false
            }
        }
    }

    /// Decodes old and new values for every feature intersecting the block
    /// and emits a change event where they differ.
    fn diff_block(
        &mut self,
        unit: &Unit,
        block: &RegisterBlock,
        previous: Option<&[u16]>,
        current: &[u16],
    ) {
        let registry = Arc::clone(&self.registry);
        for feature in registry.intersecting(
            self.transport.id(),
            unit.unit_id,
            block.kind,
            block.start,
            block.count,
        ) {
            let old = previous.and_then(|p| feature.decode_from(block.start, p));
            let Some(new) = feature.decode_from(block.start, current) else {
                continue;
            };

            if old.as_ref() != Some(&new) {
                self.events.emit(FeatureChanged {
                    feature_id: feature.id.clone(),
                    old,
                    new,
                });
            }
        }
    }

    /// Executes the next queued write, if any.
    async fn execute_next_write(&mut self) {
        let Some(in_flight) = self.commands.pop() else {
            return;
        };
        self.execute_write(in_flight).await;
    }

    async fn execute_write(&mut self, in_flight: InFlightCommand) {
        let command = in_flight.command();

        let result = match command.kind {
            CommandKind::SetCoil => {
                self.transport
                    .write_single_coil(command.unit, command.address, command.value != 0)
                    .await
            }
            CommandKind::SetRegister => {
                self.transport
                    .write_single_register(command.unit, command.address, command.value)
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.record_success();
                in_flight.complete(Ok(()));
            }
            Err(error) => {
                if error.is_io_fault() {
                    self.record_failure();
                }
                in_flight.complete(Err(CommandError::write_failed(
                    command.unit,
                    command.address,
                    error.to_string(),
                )));
            }
        }
    }

    async fn flush_writes(&mut self) {
        self.commands.pump(Instant::now());
        while self.commands.is_pending() {
            if !self.transport.is_connected() {
                break;
            }
            self.execute_next_write().await;
            self.commands.pump(Instant::now());
        }
    }

    fn record_success(&mut self) {
        if self.health.record_success() == HealthTransition::Recovered {
            tracing::warn!(
                transport = %self.transport.id(),
                "Transport recovered, resuming normal poll interval"
            );
            let _ = self
                .status_tx
                .send(TransportStatus::Online(self.transport.id().clone()));
        }
    }

    fn record_failure(&mut self) {
        if self.health.record_failure() == HealthTransition::BecameDegraded {
            tracing::warn!(
                transport = %self.transport.id(),
                "Transport degraded after repeated I/O failures, backing off"
            );
            let _ = self
                .status_tx
                .send(TransportStatus::Offline(self.transport.id().clone()));
        }
    }

    fn log_exception(&mut self, unit: u8, address: u16, code: u8) {
        let now = Instant::now();
        let due = self
            .exception_log
            .get(&(unit, address))
            .map_or(true, |last| now.duration_since(*last) >= EXCEPTION_LOG_INTERVAL);

        if due {
            self.exception_log.insert((unit, address), now);
            tracing::warn!(
                transport = %self.transport.id(),
                unit,
                address,
                code = format_args!("{code:#04x}"),
                "Modbus exception reply, keeping last good value"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let tcp = PollerSettings::tcp();
        assert_eq!(tcp.scan_interval, Duration::from_millis(200));
        assert_eq!(tcp.degraded_interval, Duration::from_secs(5));
        assert_eq!(tcp.write_interleave, 4);
        assert_eq!(tcp.command_timeout(), Duration::from_millis(600));

        let serial = PollerSettings::serial();
        assert_eq!(serial.scan_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_scan_interval_override() {
        let settings = PollerSettings::tcp().with_scan_interval(Duration::from_secs(1));
        assert_eq!(settings.scan_interval, Duration::from_secs(1));
        assert_eq!(settings.command_timeout(), Duration::from_secs(3));
    }
}
