// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Home Assistant MQTT discovery.
//!
//! On every successful broker connect one retained JSON document per feature
//! and per cover is published to
//! `<discovery_prefix>/<component>/<device_name>/<object_id>/config`, so the
//! device self-registers in the Home Assistant UI. Discovery topics are left
//! retained on shutdown, the standard Home Assistant pattern.
//!
//! Relays that drive a cover are announced through the cover document only,
//! never as standalone switches.

use std::collections::HashSet;

use serde_json::{json, Value};

use unipi_core::features::{Feature, FeatureRegistry};
use unipi_core::types::{FeatureId, FeatureKind};
use unipi_covers::CoverDeviceClass;

use crate::client::MqttHandle;
use crate::topics::TopicRoot;

// =============================================================================
// CoverMeta
// =============================================================================

/// Discovery metadata for one cover.
#[derive(Debug, Clone)]
pub struct CoverMeta {
    /// Cover id (object id and topic segment).
    pub id: String,
    /// Display name.
    pub friendly_name: Option<String>,
    /// Device class.
    pub device_class: CoverDeviceClass,
    /// Suggested Home Assistant area.
    pub suggested_area: Option<String>,
}

// =============================================================================
// DiscoveryEmitter
// =============================================================================

/// Builds and publishes discovery documents.
pub struct DiscoveryEmitter {
    prefix: String,
    topics: TopicRoot,
    device_name: String,
    manufacturer: String,
    model: String,
}

impl DiscoveryEmitter {
    /// Creates an emitter.
    pub fn new(
        prefix: impl Into<String>,
        topics: TopicRoot,
        device_name: impl Into<String>,
        manufacturer: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            topics,
            device_name: device_name.into(),
            manufacturer: manufacturer.into(),
            model: model.into(),
        }
    }

    fn device_block(&self, suggested_area: Option<&str>) -> Value {
        let mut device = json!({
            "name": self.device_name,
            "identifiers": self.device_name.to_lowercase(),
            "manufacturer": self.manufacturer,
            "model": self.model,
        });
        if let Some(area) = suggested_area {
            device["suggested_area"] = json!(area);
        }
        device
    }

    fn component(feature: &Feature) -> &'static str {
        match feature.kind {
            FeatureKind::DigitalOutput | FeatureKind::RelayOutput | FeatureKind::Led => "switch",
            FeatureKind::DigitalInput => "binary_sensor",
            FeatureKind::AnalogInput | FeatureKind::AnalogOutput | FeatureKind::MeterField => {
                "sensor"
            }
        }
    }

    fn config_topic(&self, component: &str, object_id: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.prefix,
            component,
            self.topics.device_name(),
            object_id
        )
    }

    /// Builds the discovery document for a feature.
    ///
    /// Returns `None` for relays bound to a cover.
    pub fn feature_document(
        &self,
        feature: &Feature,
        cover_circuits: &HashSet<FeatureId>,
    ) -> Option<(String, Value)> {
        if cover_circuits.contains(&feature.id) {
            return None;
        }

        let component = Self::component(feature);
        let object_id = feature
            .metadata
            .object_id
            .clone()
            .unwrap_or_else(|| feature.id.to_string());

        let mut message = json!({
            "name": feature.friendly_name(),
            "unique_id": format!("{}_{}", self.topics.device_name(), feature.id),
            "state_topic": self.topics.feature_state(feature),
            "availability_topic": self.topics.availability(),
            "qos": 1,
            "device": self.device_block(feature.metadata.suggested_area.as_deref()),
        });

        match component {
            "switch" => {
                message["command_topic"] = json!(self.topics.feature_set(feature));
                message["payload_on"] = json!("ON");
                message["payload_off"] = json!("OFF");
            }
            "binary_sensor" => {
                message["payload_on"] = json!("ON");
                message["payload_off"] = json!("OFF");
            }
            _ => {}
        }

        if let Some(device_class) = &feature.metadata.device_class {
            message["device_class"] = json!(device_class);
        }
        if let Some(state_class) = &feature.metadata.state_class {
            message["state_class"] = json!(state_class);
        }
        if let Some(unit) = &feature.metadata.unit_of_measurement {
            message["unit_of_measurement"] = json!(unit);
        }
        if let Some(icon) = &feature.metadata.icon {
            message["icon"] = json!(icon);
        }

        Some((self.config_topic(component, &object_id), message))
    }

    /// Builds the discovery document for a cover.
    pub fn cover_document(&self, cover: &CoverMeta) -> (String, Value) {
        let class = cover.device_class;
        let mut message = json!({
            "name": cover.friendly_name.clone().unwrap_or_else(|| cover.id.clone()),
            "unique_id": format!("{}_{}", self.topics.device_name(), cover.id),
            "device_class": match class {
                CoverDeviceClass::Blind => "blind",
                CoverDeviceClass::RollerShutter => "shutter",
                CoverDeviceClass::GarageDoor => "garage",
            },
            "command_topic": self.topics.cover_set(&cover.id, class),
            "state_topic": self.topics.cover_state(&cover.id, class),
            "payload_open": "OPEN",
            "payload_close": "CLOSE",
            "payload_stop": "STOP",
            "availability_topic": self.topics.availability(),
            "qos": 1,
            "optimistic": false,
            "device": self.device_block(cover.suggested_area.as_deref()),
        });

        if class.tracks_position() {
            message["position_topic"] = json!(self.topics.cover_position(&cover.id, class));
            message["set_position_topic"] =
                json!(self.topics.cover_position_set(&cover.id, class));
        }
        if class.supports_tilt() {
            message["tilt_status_topic"] = json!(self.topics.cover_tilt(&cover.id, class));
            message["tilt_command_topic"] = json!(self.topics.cover_tilt_set(&cover.id, class));
        }

        (self.config_topic("cover", &cover.id), message)
    }

    /// Publishes every discovery document, retained.
    pub async fn publish_all(
        &self,
        handle: &MqttHandle,
        registry: &FeatureRegistry,
        covers: &[CoverMeta],
        cover_circuits: &HashSet<FeatureId>,
    ) {
        for feature in registry.iter() {
            if let Some((topic, message)) = self.feature_document(feature, cover_circuits) {
                self.publish(handle, topic, message).await;
            }
        }
        for cover in covers {
            let (topic, message) = self.cover_document(cover);
            self.publish(handle, topic, message).await;
        }
    }

    async fn publish(&self, handle: &MqttHandle, topic: String, message: Value) {
        match serde_json::to_vec(&message) {
            Ok(payload) => {
                if let Err(error) = handle.publish_retained(&topic, payload).await {
                    tracing::warn!(topic, %error, "Discovery publish failed");
                } else {
                    tracing::debug!(topic, "Discovery document published");
                }
            }
            Err(error) => tracing::warn!(topic, %error, "Discovery document not serializable"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use unipi_core::features::{FeatureCodec, FeatureMetadata};
    use unipi_core::types::{BlockKind, Circuit, TransportId, WordOrder};

    fn emitter() -> DiscoveryEmitter {
        DiscoveryEmitter::new(
            "homeassistant",
            TopicRoot::new("unipi"),
            "unipi",
            "Unipi technology",
            "L203",
        )
    }

    fn relay(id: &str) -> Feature {
        Feature {
            id: FeatureId::new(id),
            kind: FeatureKind::RelayOutput,
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
    fn test_switch_document() {
        let (topic, message) = emitter()
            .feature_document(&relay("ro_3_01"), &HashSet::new())
            .unwrap();

        assert_eq!(topic, "homeassistant/switch/unipi/ro_3_01/config");
        assert_eq!(message["command_topic"], "unipi/relay/ro_3_01/set");
        assert_eq!(message["state_topic"], "unipi/relay/ro_3_01/get");
        assert_eq!(message["availability_topic"], "unipi/availability");
        assert_eq!(message["device"]["manufacturer"], "Unipi technology");
    }

    #[test]
    fn test_cover_relay_excluded() {
        let circuits = HashSet::from([FeatureId::new("ro_3_01")]);
        assert!(emitter().feature_document(&relay("ro_3_01"), &circuits).is_none());
    }

    #[test]
    fn test_sensor_document_with_metadata() {
        let mut meter = relay("voltage_1");
        meter.kind = FeatureKind::MeterField;
        meter.circuit = None;
        meter.codec = FeatureCodec::F32 {
            reg: 0,
            order: WordOrder::BigSwapped,
        };
        meter.metadata = FeatureMetadata {
            unit_of_measurement: Some("V".to_string()),
            device_class: Some("voltage".to_string()),
            state_class: Some("measurement".to_string()),
            ..Default::default()
        };

        let (topic, message) = emitter().feature_document(&meter, &HashSet::new()).unwrap();
        assert_eq!(topic, "homeassistant/sensor/unipi/voltage_1/config");
        assert_eq!(message["unit_of_measurement"], "V");
        assert_eq!(message["device_class"], "voltage");
        assert!(message.get("command_topic").is_none());
    }

    #[test]
    fn test_object_id_override() {
        let mut feature = relay("ro_3_01");
        feature.metadata.object_id = Some("garden_pump".to_string());
        let (topic, _) = emitter().feature_document(&feature, &HashSet::new()).unwrap();
        assert_eq!(topic, "homeassistant/switch/unipi/garden_pump/config");
    }

    #[test]
    fn test_blind_document() {
        let (topic, message) = emitter().cover_document(&CoverMeta {
            id: "living-room".to_string(),
            friendly_name: Some("Living room blind".to_string()),
            device_class: CoverDeviceClass::Blind,
            suggested_area: Some("Living room".to_string()),
        });

        assert_eq!(topic, "homeassistant/cover/unipi/living-room/config");
        assert_eq!(message["command_topic"], "unipi/living-room/cover/blind/set");
        assert_eq!(
            message["set_position_topic"],
            "unipi/living-room/cover/blind/position/set"
        );
        assert_eq!(
            message["tilt_command_topic"],
            "unipi/living-room/cover/blind/tilt/set"
        );
        assert_eq!(message["device"]["suggested_area"], "Living room");
    }

    #[test]
    fn test_roller_shutter_document_has_no_position() {
        let (_, message) = emitter().cover_document(&CoverMeta {
            id: "garage-window".to_string(),
            friendly_name: None,
            device_class: CoverDeviceClass::RollerShutter,
            suggested_area: None,
        });

        assert!(message.get("position_topic").is_none());
        assert!(message.get("tilt_status_topic").is_none());
        assert_eq!(message["name"], "garage-window");
    }
}
