// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport health tracking.
//!
//! Three consecutive I/O failures mark a transport *degraded*: the scan loop
//! backs off to the slow poll interval and the MQTT plane publishes `offline`
//! to the availability topic. Reconnect attempts use exponential backoff
//! capped at 30 seconds. State transitions are logged exactly once, not per
//! retry.

use std::time::Duration;

const DEGRADED_THRESHOLD: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Health transition produced by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// No state change.
    None,
    /// The transport just became degraded.
    BecameDegraded,
    /// The transport just recovered.
    Recovered,
}

/// Per-transport consecutive-failure counter with reconnect backoff.
#[derive(Debug)]
pub struct TransportHealth {
    consecutive_failures: u32,
    degraded: bool,
    backoff: Duration,
}

impl TransportHealth {
    /// Creates a healthy tracker.
    pub fn new() -> Self {
        Self {
            consecutive_failures: 0,
            degraded: false,
            backoff: INITIAL_BACKOFF,
        }
    }

    /// Records a successful transaction.
    pub fn record_success(&mut self) -> HealthTransition {
        self.consecutive_failures = 0;
        self.backoff = INITIAL_BACKOFF;
        if self.degraded {
            self.degraded = false;
            HealthTransition::Recovered
        } else {
            HealthTransition::None
        }
    }

    /// Records an I/O failure.
    pub fn record_failure(&mut self) -> HealthTransition {
        self.consecutive_failures += 1;
        if !self.degraded && self.consecutive_failures >= DEGRADED_THRESHOLD {
            self.degraded = true;
            HealthTransition::BecameDegraded
        } else {
            HealthTransition::None
        }
    }

    /// Returns `true` while the transport is degraded.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Returns the current reconnect backoff and doubles it for next time.
    pub fn next_backoff(&mut self) -> Duration {
        let current = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        current
    }
}

impl Default for TransportHealth {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_after_three_failures() {
        let mut health = TransportHealth::new();
        assert_eq!(health.record_failure(), HealthTransition::None);
        assert_eq!(health.record_failure(), HealthTransition::None);
        assert_eq!(health.record_failure(), HealthTransition::BecameDegraded);
        assert!(health.is_degraded());
        // Further failures do not re-report the transition.
        assert_eq!(health.record_failure(), HealthTransition::None);
    }

    #[test]
    fn test_recovery() {
        let mut health = TransportHealth::new();
        for _ in 0..3 {
            health.record_failure();
        }
        assert_eq!(health.record_success(), HealthTransition::Recovered);
        assert!(!health.is_degraded());
        assert_eq!(health.record_success(), HealthTransition::None);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut health = TransportHealth::new();
        health.record_failure();
        health.record_failure();
        health.record_success();
        assert_eq!(health.record_failure(), HealthTransition::None);
        assert_eq!(health.record_failure(), HealthTransition::None);
        assert_eq!(health.record_failure(), HealthTransition::BecameDegraded);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut health = TransportHealth::new();
        assert_eq!(health.next_backoff(), Duration::from_secs(1));
        assert_eq!(health.next_backoff(), Duration::from_secs(2));
        assert_eq!(health.next_backoff(), Duration::from_secs(4));
        for _ in 0..8 {
            health.next_backoff();
        }
        assert_eq!(health.next_backoff(), Duration::from_secs(30));

        health.record_success();
        assert_eq!(health.next_backoff(), Duration::from_secs(1));
    }
}
