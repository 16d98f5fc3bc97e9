// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT topic grammar.
//!
//! All topics hang off the configured device name:
//!
//! ```text
//! <device_name>/relay/ro_<g>_<cc>/get|set
//! <device_name>/input/di_<g>_<cc>/get
//! <device_name>/meter/<field>_<unit>/get
//! <device_name>/availability
//! <device_name>/<object_id>/cover/<device_class>/state|set|position|tilt|...
//! ```

use unipi_core::features::Feature;
use unipi_covers::CoverDeviceClass;

/// Builds topics under one device name.
#[derive(Debug, Clone)]
pub struct TopicRoot {
    device_name: String,
}

impl TopicRoot {
    /// Creates a topic root. The device name is lowercased, matching the
    /// discovery payloads.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into().to_lowercase(),
        }
    }

    /// The device name segment.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Retained availability topic (`online`/`offline`).
    pub fn availability(&self) -> String {
        format!("{}/availability", self.device_name)
    }

    fn feature_base(&self, feature: &Feature) -> String {
        format!(
            "{}/{}/{}",
            self.device_name,
            feature.kind.topic_component(),
            feature.id
        )
    }

    /// Retained state topic of a feature.
    pub fn feature_state(&self, feature: &Feature) -> String {
        format!("{}/get", self.feature_base(feature))
    }

    /// Command topic of a writable feature.
    pub fn feature_set(&self, feature: &Feature) -> String {
        format!("{}/set", self.feature_base(feature))
    }

    fn cover_base(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/{}/cover/{}", self.device_name, id, device_class)
    }

    /// Retained cover state topic.
    pub fn cover_state(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/state", self.cover_base(id, device_class))
    }

    /// Cover command topic (`OPEN`/`CLOSE`/`STOP`).
    pub fn cover_set(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/set", self.cover_base(id, device_class))
    }

    /// Retained cover position topic.
    pub fn cover_position(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/position", self.cover_base(id, device_class))
    }

    /// Cover position command topic.
    pub fn cover_position_set(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/position/set", self.cover_base(id, device_class))
    }

    /// Retained cover tilt topic.
    pub fn cover_tilt(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/tilt", self.cover_base(id, device_class))
    }

    /// Cover tilt command topic.
    pub fn cover_tilt_set(&self, id: &str, device_class: CoverDeviceClass) -> String {
        format!("{}/tilt/set", self.cover_base(id, device_class))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use unipi_core::features::{FeatureCodec, FeatureMetadata};
    use unipi_core::types::{BlockKind, Circuit, FeatureId, FeatureKind, TransportId};

    fn feature(id: &str, kind: FeatureKind) -> Feature {
        Feature {
            id: FeatureId::new(id),
            kind,
            circuit: Some(Circuit::new(3, 1)),
            transport: TransportId::new("tcp"),
            unit: 0,
            block_kind: BlockKind::Holding,
            codec: FeatureCodec::Bit {
                reg: 0,
                bit: 0,
                coil: Some(8),
                packed: None,
            },
            metadata: FeatureMetadata::default(),
        }
    }

    #[test]
    fn test_feature_topics() {
        let root = TopicRoot::new("Unipi");
        let relay = feature("ro_3_01", FeatureKind::RelayOutput);
        assert_eq!(root.feature_state(&relay), "unipi/relay/ro_3_01/get");
        assert_eq!(root.feature_set(&relay), "unipi/relay/ro_3_01/set");

        let input = feature("di_3_02", FeatureKind::DigitalInput);
        assert_eq!(root.feature_state(&input), "unipi/input/di_3_02/get");
    }

    #[test]
    fn test_meter_topic() {
        let root = TopicRoot::new("unipi");
        let mut meter = feature("voltage_1", FeatureKind::MeterField);
        meter.circuit = None;
        assert_eq!(root.feature_state(&meter), "unipi/meter/voltage_1/get");
    }

    #[test]
    fn test_cover_topics() {
        let root = TopicRoot::new("unipi");
        let class = CoverDeviceClass::Blind;
        assert_eq!(
            root.cover_state("living-room", class),
            "unipi/living-room/cover/blind/state"
        );
        assert_eq!(
            root.cover_set("living-room", class),
            "unipi/living-room/cover/blind/set"
        );
        assert_eq!(
            root.cover_position_set("living-room", class),
            "unipi/living-room/cover/blind/position/set"
        );
        assert_eq!(
            root.cover_tilt("living-room", class),
            "unipi/living-room/cover/blind/tilt"
        );
    }

    #[test]
    fn test_availability() {
        assert_eq!(TopicRoot::new("unipi").availability(), "unipi/availability");
    }
}
