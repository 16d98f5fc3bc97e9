// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory register cache.
//!
//! The cache maps `(unit, address)` to the last value read from the hardware.
//! Values are stored per register block as immutable `Arc<[u16]>` slices;
//! [`RegisterCache::update_block`] swaps the whole slice atomically and bumps
//! a per-block generation counter, so readers take cheap snapshots and never
//! block a scan in progress.
//!
//! The cache is the only cross-task shared state in the daemon. It is mutated
//! only by scan loops, each owning its blocks exclusively.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{BlockKind, RegisterBlock};

// =============================================================================
// RegisterCache
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    unit: u8,
    kind: BlockKind,
    start: u16,
}

#[derive(Debug)]
struct BlockSlot {
    count: u16,
    values: Option<Arc<[u16]>>,
    generation: u64,
}

/// Result of a block update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockUpdate {
    /// `true` if any register in the block changed (or this was the first
    /// successful read).
    pub changed: bool,
    /// Generation after the update.
    pub generation: u64,
}

/// Flat keyed store for scanned register values.
///
/// # Examples
///
/// ```
/// use unipi_core::cache::RegisterCache;
/// use unipi_core::types::{BlockKind, RegisterBlock};
///
/// let cache = RegisterCache::new();
/// let block = RegisterBlock::new(0, 4, BlockKind::Holding);
/// cache.register_block(0, block);
///
/// cache.update_block(0, &block, &[1, 2, 3, 4]);
/// assert_eq!(cache.value(0, BlockKind::Holding, 2), Some(3));
/// ```
#[derive(Debug, Default)]
pub struct RegisterCache {
    inner: RwLock<HashMap<BlockKey, BlockSlot>>,
}

impl RegisterCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block at startup. The cache grows to a fixed size and
    /// only the registered blocks are ever updated.
    pub fn register_block(&self, unit: u8, block: RegisterBlock) {
        let mut inner = self.inner.write();
        inner.insert(
            BlockKey {
                unit,
                kind: block.kind,
                start: block.start,
            },
            BlockSlot {
                count: block.count,
                values: None,
                generation: 0,
            },
        );
    }

    /// Atomically replaces a block's values and bumps its generation.
    ///
    /// Returns `None` if the block was never registered or `values` has the
    /// wrong length.
    pub fn update_block(
        &self,
        unit: u8,
        block: &RegisterBlock,
        values: &[u16],
    ) -> Option<BlockUpdate> {
        let mut inner = self.inner.write();
        let slot = inner.get_mut(&BlockKey {
            unit,
            kind: block.kind,
            start: block.start,
        })?;

        if values.len() != slot.count as usize {
            return None;
        }

        let changed = match &slot.values {
            Some(previous) => previous.as_ref() != values,
            None => true,
        };

        if changed {
            slot.values = Some(Arc::from(values));
            slot.generation += 1;
        }

        Some(BlockUpdate {
            changed,
            generation: slot.generation,
        })
    }

    /// Takes a snapshot of a block. The returned slice is immutable and
    /// survives later updates.
    pub fn snapshot(&self, unit: u8, block: &RegisterBlock) -> Option<Arc<[u16]>> {
        let inner = self.inner.read();
        inner
            .get(&BlockKey {
                unit,
                kind: block.kind,
                start: block.start,
            })?
            .values
            .clone()
    }

    /// Reads a single cached register value.
    pub fn value(&self, unit: u8, kind: BlockKind, address: u16) -> Option<u16> {
        let inner = self.inner.read();
        for (key, slot) in inner.iter() {
            if key.unit != unit || key.kind != kind {
                continue;
            }
            let end = key.start as u32 + slot.count as u32;
            if address >= key.start && (address as u32) < end {
                let offset = (address - key.start) as usize;
                return slot.values.as_ref().map(|v| v[offset]);
            }
        }
        None
    }

    /// Reads `count` consecutive cached registers starting at `address`.
    ///
    /// Returns `None` when the range crosses a block boundary or any value
    /// is missing.
    pub fn values(&self, unit: u8, kind: BlockKind, address: u16, count: u16) -> Option<Vec<u16>> {
        let inner = self.inner.read();
        for (key, slot) in inner.iter() {
            if key.unit != unit || key.kind != kind {
                continue;
            }
            let end = key.start as u32 + slot.count as u32;
            if address >= key.start && address as u32 + count as u32 <= end {
                let offset = (address - key.start) as usize;
                return slot
                    .values
                    .as_ref()
                    .map(|v| v[offset..offset + count as usize].to_vec());
            }
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> RegisterBlock {
        RegisterBlock::new(100, 4, BlockKind::Holding)
    }

    #[test]
    fn test_update_and_value() {
        let cache = RegisterCache::new();
        cache.register_block(0, block());

        assert_eq!(cache.value(0, BlockKind::Holding, 101), None);

        let update = cache.update_block(0, &block(), &[10, 20, 30, 40]).unwrap();
        assert!(update.changed);
        assert_eq!(update.generation, 1);
        assert_eq!(cache.value(0, BlockKind::Holding, 101), Some(20));
        assert_eq!(cache.value(0, BlockKind::Holding, 104), None);
        assert_eq!(cache.value(1, BlockKind::Holding, 101), None);
    }

    #[test]
    fn test_unchanged_update_keeps_generation() {
        let cache = RegisterCache::new();
        cache.register_block(0, block());

        cache.update_block(0, &block(), &[1, 2, 3, 4]).unwrap();
        let update = cache.update_block(0, &block(), &[1, 2, 3, 4]).unwrap();
        assert!(!update.changed);
        assert_eq!(update.generation, 1);

        let update = cache.update_block(0, &block(), &[1, 2, 3, 5]).unwrap();
        assert!(update.changed);
        assert_eq!(update.generation, 2);
    }

    #[test]
    fn test_snapshot_is_immutable() {
        let cache = RegisterCache::new();
        cache.register_block(0, block());
        cache.update_block(0, &block(), &[1, 2, 3, 4]).unwrap();

        let snapshot = cache.snapshot(0, &block()).unwrap();
        cache.update_block(0, &block(), &[9, 9, 9, 9]).unwrap();

        assert_eq!(snapshot.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(cache.snapshot(0, &block()).unwrap().as_ref(), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_values_range() {
        let cache = RegisterCache::new();
        cache.register_block(0, block());
        cache.update_block(0, &block(), &[1, 2, 3, 4]).unwrap();

        assert_eq!(cache.values(0, BlockKind::Holding, 101, 2), Some(vec![2, 3]));
        // Crosses the end of the block.
        assert_eq!(cache.values(0, BlockKind::Holding, 103, 2), None);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let cache = RegisterCache::new();
        cache.register_block(0, block());
        assert!(cache.update_block(0, &block(), &[1, 2]).is_none());
    }

    #[test]
    fn test_input_and_holding_do_not_alias() {
        let cache = RegisterCache::new();
        let holding = RegisterBlock::new(0, 2, BlockKind::Holding);
        let input = RegisterBlock::new(0, 2, BlockKind::Input);
        cache.register_block(0, holding);
        cache.register_block(0, input);

        cache.update_block(0, &holding, &[1, 1]).unwrap();
        cache.update_block(0, &input, &[2, 2]).unwrap();

        assert_eq!(cache.value(0, BlockKind::Holding, 0), Some(1));
        assert_eq!(cache.value(0, BlockKind::Input, 0), Some(2));
    }
}
