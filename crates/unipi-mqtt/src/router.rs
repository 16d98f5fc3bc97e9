// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Inbound topic routing.
//!
//! The router is a pre-built map from subscribed topic to handler. Feature
//! `/set` payloads are translated to write commands and submitted to the
//! owning transport's command queue; cover topics enqueue a command on the
//! cover controller's mailbox. Malformed payloads are logged at warning
//! level and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use unipi_core::command::CommandSender;
use unipi_core::features::FeatureRegistry;
use unipi_core::types::{FeatureId, FeatureValue, TransportId};
use unipi_covers::{CoverCommand, CoverDeviceClass};

use crate::topics::TopicRoot;

// =============================================================================
// Routes
// =============================================================================

#[derive(Debug, Clone)]
enum Route {
    FeatureSet(FeatureId),
    CoverCommand(String),
    CoverPosition(String),
    CoverTilt(String),
}

/// A cover registered with the router.
pub struct CoverRoute {
    /// Cover id (topic segment).
    pub id: String,
    /// Device class (topic segment).
    pub device_class: CoverDeviceClass,
    /// Controller mailbox.
    pub mailbox: mpsc::Sender<CoverCommand>,
}

// =============================================================================
// TopicRouter
// =============================================================================

/// Pre-built topic dispatch table.
pub struct TopicRouter {
    routes: HashMap<String, Route>,
    registry: Arc<FeatureRegistry>,
    commands: HashMap<TransportId, CommandSender>,
    covers: HashMap<String, mpsc::Sender<CoverCommand>>,
}

impl TopicRouter {
    /// Builds the router from the registry and the configured covers.
    pub fn new(
        topics: &TopicRoot,
        registry: Arc<FeatureRegistry>,
        commands: HashMap<TransportId, CommandSender>,
        covers: Vec<CoverRoute>,
    ) -> Self {
        let mut routes = HashMap::new();

        for feature in registry.iter_writable() {
            routes.insert(
                topics.feature_set(feature),
                Route::FeatureSet(feature.id.clone()),
            );
        }

        let mut cover_mailboxes = HashMap::new();
        for cover in covers {
            routes.insert(
                topics.cover_set(&cover.id, cover.device_class),
                Route::CoverCommand(cover.id.clone()),
            );
            if cover.device_class.tracks_position() {
                routes.insert(
                    topics.cover_position_set(&cover.id, cover.device_class),
                    Route::CoverPosition(cover.id.clone()),
                );
            }
            if cover.device_class.supports_tilt() {
                routes.insert(
                    topics.cover_tilt_set(&cover.id, cover.device_class),
                    Route::CoverTilt(cover.id.clone()),
                );
            }
            cover_mailboxes.insert(cover.id, cover.mailbox);
        }

        Self {
            routes,
            registry,
            commands,
            covers: cover_mailboxes,
        }
    }

    /// Every topic the MQTT connection must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Dispatches one inbound publish.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let Some(route) = self.routes.get(topic) else {
            tracing::debug!(topic, "Publish on unrouted topic ignored");
            return;
        };

        let Ok(payload) = std::str::from_utf8(payload) else {
            tracing::warn!(topic, "Dropping non-UTF-8 payload");
            return;
        };

        match route {
            Route::FeatureSet(feature_id) => self.dispatch_feature(topic, feature_id, payload),
            Route::CoverCommand(id) => {
                let command = match payload {
                    "OPEN" => CoverCommand::Open,
                    "CLOSE" => CoverCommand::Close,
                    "STOP" => CoverCommand::Stop,
                    other => {
                        tracing::warn!(topic, payload = other, "Dropping malformed cover command");
                        return;
                    }
                };
                self.send_cover(id, command).await;
            }
            Route::CoverPosition(id) => {
                let Some(target) = parse_percentage(payload) else {
                    tracing::warn!(topic, payload, "Dropping malformed position");
                    return;
                };
                self.send_cover(id, CoverCommand::SetPosition(target)).await;
            }
            Route::CoverTilt(id) => {
                let Some(target) = parse_percentage(payload) else {
                    tracing::warn!(topic, payload, "Dropping malformed tilt");
                    return;
                };
                self.send_cover(id, CoverCommand::SetTilt(target)).await;
            }
        }
    }

    fn dispatch_feature(&self, topic: &str, feature_id: &FeatureId, payload: &str) {
        let Some(feature) = self.registry.get(feature_id) else {
            return;
        };

        // Digital outputs take ON/OFF, analog outputs a plain number.
        let value = if feature.kind.is_digital() {
            match FeatureValue::parse_switch(payload) {
                Some(on) => FeatureValue::Bool(on),
                None => {
                    tracing::warn!(topic, payload, "Dropping malformed switch payload");
                    return;
                }
            }
        } else {
            match payload.trim().parse::<f32>() {
                Ok(raw) => FeatureValue::Float(raw),
                Err(_) => {
                    tracing::warn!(topic, payload, "Dropping malformed analog payload");
                    return;
                }
            }
        };

        let command = match feature.encode_write(value) {
            Ok(command) => command,
            Err(error) => {
                tracing::warn!(topic, %error, "Write not encodable");
                return;
            }
        };

        let Some(sender) = self.commands.get(&feature.transport) else {
            tracing::warn!(topic, transport = %feature.transport, "No command queue for transport");
            return;
        };

        let handle = sender.submit(command);
        let feature_id = feature.id.clone();
        tokio::spawn(async move {
            if let Err(error) = handle.wait().await {
                tracing::warn!(feature = %feature_id, %error, "Write command failed");
            }
        });
    }

    async fn send_cover(&self, id: &str, command: CoverCommand) {
        let Some(mailbox) = self.covers.get(id) else {
            return;
        };
        if mailbox.send(command).await.is_err() {
            tracing::warn!(cover = id, "Cover controller mailbox closed");
        }
    }
}

fn parse_percentage(payload: &str) -> Option<u8> {
    payload.trim().parse::<u8>().ok().filter(|v| *v <= 100)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use unipi_core::command::{CommandKind, CommandQueue};
    use unipi_core::features::{Feature, FeatureCodec, FeatureMetadata};
    use unipi_core::types::{BlockKind, Circuit, FeatureKind};

    fn registry() -> Arc<FeatureRegistry> {
        let mut registry = FeatureRegistry::new();
        registry
            .register(Feature {
                id: FeatureId::new("ro_3_01"),
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
            })
            .unwrap();
        Arc::new(registry)
    }

    fn router_with_cover() -> (TopicRouter, CommandQueue, mpsc::Receiver<CoverCommand>) {
        let topics = TopicRoot::new("unipi");
        let (sender, queue) = CommandQueue::channel(Duration::from_secs(1));
        let (cover_tx, cover_rx) = mpsc::channel(8);

        let router = TopicRouter::new(
            &topics,
            registry(),
            HashMap::from([(TransportId::new("tcp"), sender)]),
            vec![CoverRoute {
                id: "living-room".to_string(),
                device_class: CoverDeviceClass::Blind,
                mailbox: cover_tx,
            }],
        );
        (router, queue, cover_rx)
    }

    #[test]
    fn test_subscriptions() {
        let (router, _queue, _cover_rx) = router_with_cover();
        let topics = router.subscriptions();
        assert!(topics.contains(&"unipi/relay/ro_3_01/set".to_string()));
        assert!(topics.contains(&"unipi/living-room/cover/blind/set".to_string()));
        assert!(topics.contains(&"unipi/living-room/cover/blind/position/set".to_string()));
        assert!(topics.contains(&"unipi/living-room/cover/blind/tilt/set".to_string()));
        assert_eq!(topics.len(), 4);
    }

    #[tokio::test]
    async fn test_feature_set_dispatch() {
        let (router, mut queue, _cover_rx) = router_with_cover();

        router.dispatch("unipi/relay/ro_3_01/set", b"ON").await;
        queue.pump(tokio::time::Instant::now());

        let in_flight = queue.pop().unwrap();
        assert_eq!(in_flight.command().kind, CommandKind::SetCoil);
        assert_eq!(in_flight.command().address, 8);
        assert_eq!(in_flight.command().value, 1);
        in_flight.complete(Ok(()));
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped() {
        let (router, mut queue, _cover_rx) = router_with_cover();

        router.dispatch("unipi/relay/ro_3_01/set", b"on").await;
        router.dispatch("unipi/relay/ro_3_01/set", b"\xff\xfe").await;
        queue.pump(tokio::time::Instant::now());

        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_cover_dispatch() {
        let (router, _queue, mut cover_rx) = router_with_cover();

        router.dispatch("unipi/living-room/cover/blind/set", b"OPEN").await;
        assert_eq!(cover_rx.recv().await, Some(CoverCommand::Open));

        router
            .dispatch("unipi/living-room/cover/blind/position/set", b"40")
            .await;
        assert_eq!(cover_rx.recv().await, Some(CoverCommand::SetPosition(40)));

        router
            .dispatch("unipi/living-room/cover/blind/tilt/set", b"101")
            .await;
        router.dispatch("unipi/living-room/cover/blind/set", b"open").await;
        assert!(cover_rx.try_recv().is_err());
    }
}
