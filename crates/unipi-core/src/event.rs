// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Feature change events.
//!
//! Scan loops emit a [`FeatureChanged`] event whenever a decoded feature
//! value differs from the previous scan. Events travel over a bounded
//! channel to the MQTT publisher; when the consumer falls behind, the queue
//! degrades to *last value wins* per feature: the newest value replaces any
//! undelivered one for the same feature and a dropped-events counter is
//! incremented. Consumers care about the current state, not every transient.
//!
//! Per-feature ordering is preserved: buffered events are always flushed
//! before newer ones are offered to the channel.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::types::{FeatureId, FeatureValue};

// =============================================================================
// FeatureChanged
// =============================================================================

/// A feature-level diff produced by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureChanged {
    /// The feature that changed.
    pub feature_id: FeatureId,
    /// Value before the scan (`None` before the first successful read).
    pub old: Option<FeatureValue>,
    /// Value after the scan.
    pub new: FeatureValue,
}

// =============================================================================
// EventSender
// =============================================================================

/// Producer half of the feature event queue. Owned by one scan loop.
pub struct EventSender {
    tx: mpsc::Sender<FeatureChanged>,
    /// Undelivered events in emit order, at most one per feature.
    buffered: VecDeque<FeatureChanged>,
    dropped: u64,
}

impl EventSender {
    /// Emits a change event.
    ///
    /// Never blocks. If the channel is full the event is buffered, replacing
    /// any undelivered event for the same feature (the replaced event counts
    /// as dropped).
    pub fn emit(&mut self, event: FeatureChanged) {
        self.flush();

        if self.buffered.is_empty() {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.buffered.push_back(event);
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }

        // Channel is congested; coalesce onto the buffer.
        if let Some(existing) = self
            .buffered
            .iter_mut()
            .find(|e| e.feature_id == event.feature_id)
        {
            // Keep the oldest `old` so the consumer still sees one coherent
            // transition, and count the overwritten value as dropped.
            existing.new = event.new;
            self.dropped += 1;
        } else {
            self.buffered.push_back(event);
        }
    }

    /// Retries delivery of buffered events. Called from `emit` and once per
    /// scan iteration.
    pub fn flush(&mut self) {
        while let Some(event) = self.buffered.front() {
            match self.tx.try_send(event.clone()) {
                Ok(()) => {
                    self.buffered.pop_front();
                }
                Err(mpsc::error::TrySendError::Full(_)) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.buffered.clear();
                    return;
                }
            }
        }
    }

    /// Number of events dropped due to back-pressure since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Creates another producer on the same channel with its own buffer.
    ///
    /// Scan loops own disjoint feature sets, so per-feature coalescing is
    /// unaffected by producers buffering independently.
    pub fn fork(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
            buffered: VecDeque::new(),
            dropped: 0,
        }
    }
}

/// Creates a bounded feature event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<FeatureChanged>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender {
            tx,
            buffered: VecDeque::new(),
            dropped: 0,
        },
        rx,
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, old: Option<bool>, new: bool) -> FeatureChanged {
        FeatureChanged {
            feature_id: FeatureId::new(id),
            old: old.map(FeatureValue::Bool),
            new: FeatureValue::Bool(new),
        }
    }

    #[tokio::test]
    async fn test_delivery_in_order() {
        let (mut sender, mut rx) = channel(8);

        sender.emit(change("di_1_01", None, true));
        sender.emit(change("di_1_02", None, false));

        assert_eq!(rx.recv().await.unwrap().feature_id.as_str(), "di_1_01");
        assert_eq!(rx.recv().await.unwrap().feature_id.as_str(), "di_1_02");
    }

    #[tokio::test]
    async fn test_last_value_wins_under_backpressure() {
        let (mut sender, mut rx) = channel(1);

        sender.emit(change("di_1_01", None, true));
        // Channel full: these buffer and coalesce per feature.
        sender.emit(change("di_1_02", None, true));
        sender.emit(change("di_1_02", Some(true), false));
        sender.emit(change("di_1_02", Some(false), true));

        assert_eq!(sender.dropped(), 2);

        assert_eq!(rx.recv().await.unwrap().feature_id.as_str(), "di_1_01");
        sender.flush();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.feature_id.as_str(), "di_1_02");
        // The oldest `old` and the newest `new` survive.
        assert_eq!(event.old, None);
        assert_eq!(event.new, FeatureValue::Bool(true));
    }

    #[tokio::test]
    async fn test_no_stale_overwrite() {
        let (mut sender, mut rx) = channel(1);

        sender.emit(change("ro_3_01", None, true));
        sender.emit(change("ro_3_01", Some(true), false));
        sender.emit(change("di_1_01", None, true));

        // First delivered event is the one that made it into the channel.
        assert_eq!(rx.recv().await.unwrap().new, FeatureValue::Bool(true));
        sender.flush();

        // The buffered ro_3_01 event carries the newest value only.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.feature_id.as_str(), "ro_3_01");
        assert_eq!(event.new, FeatureValue::Bool(false));

        sender.flush();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.feature_id.as_str(), "di_1_01");
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_grow() {
        let (mut sender, rx) = channel(1);
        drop(rx);

        for _ in 0..16 {
            sender.emit(change("di_1_01", None, true));
        }
        sender.flush();
    }
}
