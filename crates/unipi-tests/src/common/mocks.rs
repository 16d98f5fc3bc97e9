// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mock Modbus transport.
//!
//! A scriptable in-memory register map behind the [`ModbusTransport`] trait:
//! coil writes are reflected into the backing register bits (as the Neuron
//! firmware does), every write is recorded with a timestamp for timing
//! assertions, and reads/writes can be failed on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use unipi_core::error::TransportError;
use unipi_core::types::{BlockKind, TransportId};
use unipi_modbus::{ModbusTransport, TransportResult, TransportState};

// =============================================================================
// Write records
// =============================================================================

/// The function code a recorded write used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// FC 05.
    Coil,
    /// FC 06.
    Register,
}

/// One recorded write.
#[derive(Debug, Clone, Copy)]
pub struct WriteRecord {
    /// When the write happened (virtual time under a paused runtime).
    pub at: Instant,
    /// Target unit.
    pub unit: u8,
    /// Function code.
    pub kind: WriteKind,
    /// Coil or register address.
    pub address: u16,
    /// Written value (0/1 for coils).
    pub value: u16,
}

// =============================================================================
// Inner state
// =============================================================================

#[derive(Default)]
struct MockState {
    registers: HashMap<(u8, BlockKind, u16), u16>,
    /// Coil address to backing `(register, bit)` reflection.
    coil_map: HashMap<(u8, u16), (u16, u8)>,
    coil_states: HashMap<(u8, u16), bool>,
    /// Coil pairs that must never be on simultaneously.
    exclusive_pairs: Vec<((u8, u16), (u8, u16))>,
    history: Vec<WriteRecord>,
}

struct MockInner {
    state: Mutex<MockState>,
    connected: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_next_write: AtomicBool,
    exclusive_violation: AtomicBool,
}

// =============================================================================
// MockHandle
// =============================================================================

/// Assertion and scripting handle, kept by the test after the transport is
/// boxed into a scan loop.
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<MockInner>,
}

impl MockHandle {
    /// Sets a register value directly (simulates external input changes).
    pub fn set_register(&self, unit: u8, kind: BlockKind, address: u16, value: u16) {
        self.inner.state.lock().registers.insert((unit, kind, address), value);
    }

    /// Reads a register value.
    pub fn register(&self, unit: u8, kind: BlockKind, address: u16) -> u16 {
        *self
            .inner
            .state
            .lock()
            .registers
            .get(&(unit, kind, address))
            .unwrap_or(&0)
    }

    /// Maps a coil address onto a register bit, as the hardware definition
    /// does.
    pub fn map_coil(&self, unit: u8, coil: u16, register: u16, bit: u8) {
        self.inner
            .state
            .lock()
            .coil_map
            .insert((unit, coil), (register, bit));
    }

    /// Declares two coils as mutually exclusive (a cover relay pair).
    pub fn exclusive_coils(&self, unit: u8, a: u16, b: u16) {
        self.inner
            .state
            .lock()
            .exclusive_pairs
            .push(((unit, a), (unit, b)));
    }

    /// `true` if both coils of an exclusive pair were ever on at once.
    pub fn exclusive_violation(&self) -> bool {
        self.inner.exclusive_violation.load(Ordering::SeqCst)
    }

    /// Current commanded coil state.
    pub fn coil(&self, unit: u8, coil: u16) -> bool {
        *self
            .inner
            .state
            .lock()
            .coil_states
            .get(&(unit, coil))
            .unwrap_or(&false)
    }

    /// The recorded write history.
    pub fn history(&self) -> Vec<WriteRecord> {
        self.inner.state.lock().history.clone()
    }

    /// Writes recorded for one coil, as `(at, value)` pairs.
    pub fn coil_history(&self, unit: u8, coil: u16) -> Vec<(Instant, bool)> {
        self.inner
            .state
            .lock()
            .history
            .iter()
            .filter(|w| w.kind == WriteKind::Coil && w.unit == unit && w.address == coil)
            .map(|w| (w.at, w.value != 0))
            .collect()
    }

    /// Clears the write history.
    pub fn clear_history(&self) {
        self.inner.state.lock().history.clear();
    }

    /// Makes every read fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fails exactly the next write.
    pub fn fail_next_write(&self) {
        self.inner.fail_next_write.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// The mock transport handed to a scan loop.
pub struct MockTransport {
    id: TransportId,
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Creates a mock transport and its assertion handle.
    pub fn new(id: impl Into<String>) -> (Self, MockHandle) {
        let inner = Arc::new(MockInner {
            state: Mutex::new(MockState::default()),
            connected: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_next_write: AtomicBool::new(false),
            exclusive_violation: AtomicBool::new(false),
        });
        let handle = MockHandle {
            inner: Arc::clone(&inner),
        };
        (
            Self {
                id: TransportId::new(id),
                inner,
            },
            handle,
        )
    }

    fn read(&self, unit: u8, kind: BlockKind, start: u16, count: u16) -> TransportResult<Vec<u16>> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::not_connected(self.id.as_str()));
        }
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::io(self.id.as_str(), "injected read failure"));
        }

        let state = self.inner.state.lock();
        Ok((start..start + count)
            .map(|address| *state.registers.get(&(unit, kind, address)).unwrap_or(&0))
            .collect())
    }

    fn check_write(&self) -> TransportResult<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(TransportError::not_connected(self.id.as_str()));
        }
        if self.inner.fail_next_write.swap(false, Ordering::SeqCst)
            || self.inner.fail_writes.load(Ordering::SeqCst)
        {
            return Err(TransportError::io(self.id.as_str(), "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ModbusTransport for MockTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> TransportState {
        if self.is_connected() {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    async fn read_holding(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.read(unit, BlockKind::Holding, start, count)
    }

    async fn read_input(&self, unit: u8, start: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.read(unit, BlockKind::Input, start, count)
    }

    async fn write_single_coil(&self, unit: u8, address: u16, value: bool) -> TransportResult<()> {
        self.check_write()?;

        let mut state = self.inner.state.lock();
        state.history.push(WriteRecord {
            at: Instant::now(),
            unit,
            kind: WriteKind::Coil,
            address,
            value: u16::from(value),
        });
        state.coil_states.insert((unit, address), value);

        // Reflect the coil into its backing register bit.
        if let Some((register, bit)) = state.coil_map.get(&(unit, address)).copied() {
            let key = (unit, BlockKind::Holding, register);
            let word = state.registers.get(&key).copied().unwrap_or(0);
            let word = if value {
                word | (1 << bit)
            } else {
                word & !(1 << bit)
            };
            state.registers.insert(key, word);
        }

        // Electrical safety watchdog for cover relay pairs.
        for (a, b) in state.exclusive_pairs.clone() {
            let a_on = state.coil_states.get(&a).copied().unwrap_or(false);
            let b_on = state.coil_states.get(&b).copied().unwrap_or(false);
            if a_on && b_on {
                self.inner.exclusive_violation.store(true, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    async fn write_single_register(
        &self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> TransportResult<()> {
        self.check_write()?;

        let mut state = self.inner.state.lock();
        state.history.push(WriteRecord {
            at: Instant::now(),
            unit,
            kind: WriteKind::Register,
            address,
            value,
        });
        state
            .registers
            .insert((unit, BlockKind::Holding, address), value);
        Ok(())
    }

    fn id(&self) -> &TransportId {
        &self.id
    }

    fn display_name(&self) -> String {
        format!("mock transport {}", self.id)
    }
}
