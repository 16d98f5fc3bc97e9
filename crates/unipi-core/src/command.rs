// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write command queue.
//!
//! Each Modbus transport owns one [`CommandQueue`]. Producers (the MQTT
//! router, cover controllers) submit [`PendingCommand`]s through a cloneable
//! [`CommandSender`] and receive a [`CommandHandle`] that resolves once the
//! physical write has completed (or failed).
//!
//! Queue semantics:
//!
//! - `submit` never blocks.
//! - Commands for the same `(unit, address)` that are queued but not yet in
//!   flight coalesce; the newest value wins and all waiting handles resolve
//!   with the outcome of the single write that is actually performed.
//! - Across distinct addresses the queue is FIFO.
//! - A command that sits in the queue past its deadline is dropped and its
//!   handles fail with [`CommandError::Timeout`].
//!
//! The consuming side ([`CommandQueue`]) is owned by the scan loop, which
//! interleaves writes fairly between block reads.

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CommandError;

// =============================================================================
// PendingCommand
// =============================================================================

/// The Modbus function used to execute a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Write single coil (FC 05).
    SetCoil,
    /// Write single holding register (FC 06).
    SetRegister,
}

/// A single pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    /// Target unit (slave) id.
    pub unit: u8,
    /// Coil or register address.
    pub address: u16,
    /// Value to write. For coils any non-zero value means ON.
    pub value: u16,
    /// Function code selector.
    pub kind: CommandKind,
    /// Optional queue deadline. A deadline in the past makes the scan loop
    /// execute the write before the next block read.
    pub deadline: Option<Instant>,
}

impl PendingCommand {
    /// Creates a coil write.
    pub fn set_coil(unit: u8, address: u16, on: bool) -> Self {
        Self {
            unit,
            address,
            value: u16::from(on),
            kind: CommandKind::SetCoil,
            deadline: None,
        }
    }

    /// Creates a register write.
    pub fn set_register(unit: u8, address: u16, value: u16) -> Self {
        Self {
            unit,
            address,
            value,
            kind: CommandKind::SetRegister,
            deadline: None,
        }
    }

    /// Attaches a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result delivered through a [`CommandHandle`].
pub type CommandResult = Result<(), CommandError>;

// =============================================================================
// CommandHandle
// =============================================================================

/// Completion handle returned by [`CommandSender::submit`].
///
/// Resolves after the successful write reply, or with the write's error after
/// retry exhaustion.
#[derive(Debug)]
pub struct CommandHandle {
    id: Uuid,
    rx: oneshot::Receiver<CommandResult>,
}

impl CommandHandle {
    /// Returns the command id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the command to complete.
    pub async fn wait(self) -> CommandResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(CommandError::QueueClosed),
        }
    }
}

// =============================================================================
// CommandSender
// =============================================================================

struct Submission {
    id: Uuid,
    command: PendingCommand,
    response_tx: oneshot::Sender<CommandResult>,
}

/// Cloneable producer half of a command queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Submission>,
}

impl CommandSender {
    /// Submits a command. Non-blocking.
    pub fn submit(&self, command: PendingCommand) -> CommandHandle {
        let id = Uuid::new_v4();
        let (response_tx, rx) = oneshot::channel();

        let submission = Submission {
            id,
            command,
            response_tx,
        };

        if let Err(err) = self.tx.send(submission) {
            // Queue consumer is gone; fail the handle immediately.
            let _ = err.0.response_tx.send(Err(CommandError::QueueClosed));
        }

        CommandHandle { id, rx }
    }
}

// =============================================================================
// CommandQueue
// =============================================================================

struct QueuedCommand {
    command: PendingCommand,
    waiters: Vec<oneshot::Sender<CommandResult>>,
    queued_at: Instant,
}

/// An in-flight command checked out of the queue with [`CommandQueue::pop`].
///
/// The scan loop performs the write and reports the outcome through
/// [`InFlightCommand::complete`].
pub struct InFlightCommand {
    command: PendingCommand,
    waiters: Vec<oneshot::Sender<CommandResult>>,
}

impl InFlightCommand {
    /// The command to execute.
    pub fn command(&self) -> PendingCommand {
        self.command
    }

    /// Resolves every waiting handle with the write outcome.
    pub fn complete(self, result: CommandResult) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Consumer half of a command queue. Owned by one scan loop.
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Submission>,
    queue: Vec<QueuedCommand>,
    timeout: std::time::Duration,
    coalesced: u64,
    expired: u64,
}

impl CommandQueue {
    /// Creates a queue pair. `timeout` is the maximum time a command may
    /// wait before its handles fail (spec: 3x the scan interval).
    pub fn channel(timeout: std::time::Duration) -> (CommandSender, CommandQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CommandSender { tx },
            CommandQueue {
                rx,
                queue: Vec::new(),
                timeout,
                coalesced: 0,
                expired: 0,
            },
        )
    }

    /// Drains new submissions into the internal queue, coalescing duplicates
    /// and expiring overdue entries. Call once per scan iteration.
    pub fn pump(&mut self, now: Instant) {
        while let Ok(submission) = self.rx.try_recv() {
            let key = (submission.command.unit, submission.command.address);
            match self
                .queue
                .iter_mut()
                .find(|q| (q.command.unit, q.command.address) == key)
            {
                Some(existing) => {
                    // Newest wins; everyone waits for the single write.
                    existing.command.value = submission.command.value;
                    existing.command.kind = submission.command.kind;
                    if submission.command.deadline.is_some() {
                        existing.command.deadline = submission.command.deadline;
                    }
                    existing.waiters.push(submission.response_tx);
                    self.coalesced += 1;
                }
                None => self.queue.push(QueuedCommand {
                    command: submission.command,
                    waiters: vec![submission.response_tx],
                    queued_at: now,
                }),
            }
        }

        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.queue.retain_mut(|entry| {
            if now.duration_since(entry.queued_at) > timeout {
                expired.push((
                    entry.command,
                    std::mem::take(&mut entry.waiters),
                ));
                false
            } else {
                true
            }
        });

        for (command, waiters) in expired {
            self.expired += 1;
            tracing::warn!(
                unit = command.unit,
                address = command.address,
                "Dropping write command that exceeded its queue deadline"
            );
            for waiter in waiters {
                let _ = waiter.send(Err(CommandError::timeout(command.unit, command.address)));
            }
        }
    }

    /// Checks out the next command in FIFO order.
    pub fn pop(&mut self) -> Option<InFlightCommand> {
        if self.queue.is_empty() {
            return None;
        }
        let entry = self.queue.remove(0);
        Some(InFlightCommand {
            command: entry.command,
            waiters: entry.waiters,
        })
    }

    /// Returns `true` if a queued command's deadline has passed.
    pub fn has_urgent(&self, now: Instant) -> bool {
        self.queue
            .iter()
            .any(|q| q.command.deadline.is_some_and(|d| d <= now))
    }

    /// Returns `true` if any command is waiting.
    pub fn is_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of commands coalesced away since startup.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Number of commands dropped on queue timeout since startup.
    pub fn expired(&self) -> u64 {
        self.expired
    }

    /// Fails everything still queued. Used on shutdown.
    pub fn drain_failed(&mut self) {
        for entry in self.queue.drain(..) {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(CommandError::QueueClosed));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_across_addresses() {
        let (sender, mut queue) = CommandQueue::channel(Duration::from_secs(1));

        sender.submit(PendingCommand::set_coil(0, 8, true));
        sender.submit(PendingCommand::set_coil(0, 9, true));
        queue.pump(Instant::now());

        assert_eq!(queue.pop().unwrap().command().address, 8);
        assert_eq!(queue.pop().unwrap().command().address, 9);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_coalescing_newest_wins() {
        let (sender, mut queue) = CommandQueue::channel(Duration::from_secs(1));

        let h1 = sender.submit(PendingCommand::set_coil(0, 8, true));
        let h2 = sender.submit(PendingCommand::set_coil(0, 8, false));
        let h3 = sender.submit(PendingCommand::set_coil(0, 8, true));
        queue.pump(Instant::now());

        let in_flight = queue.pop().unwrap();
        assert_eq!(in_flight.command().value, 1);
        assert!(queue.pop().is_none());
        assert_eq!(queue.coalesced(), 2);

        in_flight.complete(Ok(()));
        assert!(h1.wait().await.is_ok());
        assert!(h2.wait().await.is_ok());
        assert!(h3.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_timeout() {
        let (sender, mut queue) = CommandQueue::channel(Duration::from_millis(600));

        let handle = sender.submit(PendingCommand::set_coil(0, 8, true));
        queue.pump(Instant::now());

        tokio::time::advance(Duration::from_secs(1)).await;
        queue.pump(Instant::now());

        assert!(queue.pop().is_none());
        assert_eq!(queue.expired(), 1);
        assert!(matches!(
            handle.wait().await,
            Err(CommandError::Timeout { address: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_urgent_deadline() {
        let (sender, mut queue) = CommandQueue::channel(Duration::from_secs(5));
        let now = Instant::now();

        sender.submit(PendingCommand::set_coil(0, 8, true).with_deadline(now));
        queue.pump(now);

        assert!(queue.has_urgent(now));
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let (sender, mut queue) = CommandQueue::channel(Duration::from_secs(1));

        let handle = sender.submit(PendingCommand::set_register(1, 40, 7));
        queue.pump(Instant::now());

        let in_flight = queue.pop().unwrap();
        in_flight.complete(Err(CommandError::write_failed(1, 40, "broken pipe")));

        assert!(matches!(
            handle.wait().await,
            Err(CommandError::WriteFailed { address: 40, .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_queue_fails_handle() {
        let (sender, queue) = CommandQueue::channel(Duration::from_secs(1));
        drop(queue);

        let handle = sender.submit(PendingCommand::set_coil(0, 1, true));
        assert!(matches!(handle.wait().await, Err(CommandError::QueueClosed)));
    }
}
