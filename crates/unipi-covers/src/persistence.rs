// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cover position persistence.
//!
//! Every transition into a resting state writes a small JSON file
//! `<tmp>/unipi/cover_<id>.json` via temp-file + rename, so a crash never
//! leaves a torn file. On startup the file decides whether the cover knows
//! its position: a missing file, or one persisted in a moving state
//! (unclean shutdown), puts the cover into calibration mode.
//!
//! With `advanced.persistent_tmp_dir` the directory moves to a location that
//! survives reboots and calibration is disabled entirely.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cover::CoverState;

// =============================================================================
// PersistedCoverState
// =============================================================================

/// On-disk cover state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCoverState {
    /// Position at the time of writing (100 = fully open).
    pub position: u8,
    /// Tilt at the time of writing (0 for covers without tilt).
    pub tilt: u8,
    /// State at the time of writing.
    pub state: CoverState,
    /// Write timestamp.
    pub written_at: DateTime<Utc>,
}

impl PersistedCoverState {
    /// `true` if the previous run ended while the motor was running.
    pub fn was_moving(&self) -> bool {
        self.state.is_moving()
    }
}

// =============================================================================
// Restored
// =============================================================================

/// Outcome of loading a cover's position file.
#[derive(Debug, Clone, PartialEq)]
pub enum Restored {
    /// A clean resting state was restored.
    State(PersistedCoverState),
    /// No usable state; the cover must calibrate before normal operation.
    NeedsCalibration,
    /// No usable state and calibration is disabled; assume fully closed.
    AssumeClosed,
}

// =============================================================================
// PositionStore
// =============================================================================

/// Owns the persistence directory for all covers.
#[derive(Debug, Clone)]
pub struct PositionStore {
    dir: PathBuf,
    calibration_enabled: bool,
}

impl PositionStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, calibration_enabled: bool) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            calibration_enabled,
        })
    }

    /// Returns the file path for a cover id.
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("cover_{id}.json"))
    }

    /// Returns `true` if calibration mode is in use.
    pub fn calibration_enabled(&self) -> bool {
        self.calibration_enabled
    }

    /// Loads the persisted state for a cover.
    pub fn load(&self, id: &str) -> Restored {
        match self.read_file(&self.path(id)) {
            Ok(Some(state)) if !state.was_moving() => Restored::State(state),
            Ok(Some(_)) | Ok(None) if self.calibration_enabled => Restored::NeedsCalibration,
            Ok(Some(state)) => {
                // Unclean shutdown but calibration disabled: trust the last
                // written position.
                Restored::State(PersistedCoverState {
                    state: CoverState::Stopped,
                    ..state
                })
            }
            Ok(None) => Restored::AssumeClosed,
            Err(error) => {
                tracing::warn!(cover = id, %error, "Unreadable position file");
                if self.calibration_enabled {
                    Restored::NeedsCalibration
                } else {
                    Restored::AssumeClosed
                }
            }
        }
    }

    fn read_file(&self, path: &Path) -> std::io::Result<Option<PersistedCoverState>> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Writes a cover's state atomically (temp file + rename).
    pub fn save(&self, id: &str, state: &PersistedCoverState) -> std::io::Result<()> {
        let path = self.path(id);
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string(state)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state(position: u8, tilt: u8, state: CoverState) -> PersistedCoverState {
        PersistedCoverState {
            position,
            tilt,
            state,
            written_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("unipi"), true).unwrap();

        store
            .save("living-room", &state(40, 100, CoverState::Stopped))
            .unwrap();

        match store.load("living-room") {
            Restored::State(restored) => {
                assert_eq!(restored.position, 40);
                assert_eq!(restored.tilt, 100);
                assert_eq!(restored.state, CoverState::Stopped);
            }
            other => panic!("unexpected restore outcome: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_calibrates() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path(), true).unwrap();
        assert_eq!(store.load("unknown"), Restored::NeedsCalibration);
    }

    #[test]
    fn test_moving_state_calibrates() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path(), true).unwrap();

        store
            .save("living-room", &state(62, 0, CoverState::Closing))
            .unwrap();
        assert_eq!(store.load("living-room"), Restored::NeedsCalibration);
    }

    #[test]
    fn test_calibration_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path(), false).unwrap();

        assert_eq!(store.load("unknown"), Restored::AssumeClosed);

        store
            .save("living-room", &state(62, 0, CoverState::Closing))
            .unwrap();
        match store.load("living-room") {
            Restored::State(restored) => {
                assert_eq!(restored.position, 62);
                assert_eq!(restored.state, CoverState::Stopped);
            }
            other => panic!("unexpected restore outcome: {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path(), true).unwrap();

        fs::write(store.path("living-room"), "not json").unwrap();
        assert_eq!(store.load("living-room"), Restored::NeedsCalibration);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = PositionStore::new(dir.path(), true).unwrap();

        store
            .save("living-room", &state(10, 0, CoverState::Stopped))
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["cover_living-room.json"]);
    }
}
