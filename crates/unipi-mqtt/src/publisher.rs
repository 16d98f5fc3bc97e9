// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retained state publishing.
//!
//! The publisher task turns feature change events, cover status updates and
//! transport availability transitions into retained QoS 1 publishes. On
//! every broker connect it republishes the full current state (from the
//! register cache) plus the discovery documents, so a restarted broker ends
//! up with the same retained picture as a long-running one.
//!
//! The availability topic reads `online` only while the broker connection is
//! up and no transport is degraded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use unipi_core::cache::RegisterCache;
use unipi_core::event::FeatureChanged;
use unipi_core::features::{Feature, FeatureRegistry};
use unipi_core::types::{FeatureId, TransportId};
use unipi_covers::CoverStatus;
use unipi_modbus::TransportStatus;

use crate::client::MqttHandle;
use crate::discovery::{CoverMeta, DiscoveryEmitter};
use crate::topics::TopicRoot;

// =============================================================================
// StatePublisher
// =============================================================================

/// Inbound channels of the publisher task.
pub struct PublisherChannels {
    /// Feature change events from the scan loops.
    pub features: mpsc::Receiver<FeatureChanged>,
    /// Cover status updates from the controllers.
    pub covers: mpsc::UnboundedReceiver<CoverStatus>,
    /// Transport availability transitions from the scan loops.
    pub transports: mpsc::UnboundedReceiver<TransportStatus>,
    /// ConnAck notifications from the connection manager.
    pub connected: mpsc::UnboundedReceiver<()>,
}

/// The outbound publishing task.
pub struct StatePublisher {
    handle: MqttHandle,
    topics: TopicRoot,
    registry: Arc<FeatureRegistry>,
    cache: Arc<RegisterCache>,
    discovery: Option<DiscoveryEmitter>,
    covers: Vec<CoverMeta>,
    cover_circuits: HashSet<FeatureId>,
    channels: PublisherChannels,
    last_cover_status: HashMap<String, CoverStatus>,
    degraded: HashSet<TransportId>,
    broker_connected: bool,
    availability: Option<bool>,
}

impl StatePublisher {
    /// Creates the publisher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: MqttHandle,
        topics: TopicRoot,
        registry: Arc<FeatureRegistry>,
        cache: Arc<RegisterCache>,
        discovery: Option<DiscoveryEmitter>,
        covers: Vec<CoverMeta>,
        cover_circuits: HashSet<FeatureId>,
        channels: PublisherChannels,
    ) -> Self {
        Self {
            handle,
            topics,
            registry,
            cache,
            discovery,
            covers,
            cover_circuits,
            channels,
            last_cover_status: HashMap::new(),
            degraded: HashSet::new(),
            broker_connected: false,
            availability: None,
        }
    }

    /// Runs until shutdown; the final act is a retained `offline`.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                connected = self.channels.connected.recv() => match connected {
                    Some(()) => self.on_connected().await,
                    None => break,
                },
                event = self.channels.features.recv() => match event {
                    Some(event) => self.publish_feature_event(&event).await,
                    None => break,
                },
                status = self.channels.covers.recv() => match status {
                    Some(status) => self.publish_cover(status).await,
                    None => break,
                },
                status = self.channels.transports.recv() => match status {
                    Some(status) => self.on_transport(status).await,
                    None => break,
                },
            }
        }

        // Drain final cover states written during shutdown, then sign off.
        while let Ok(status) = self.channels.covers.try_recv() {
            self.publish_cover(status).await;
        }
        let _ = self
            .handle
            .publish_retained(self.topics.availability(), "offline")
            .await;

        tracing::info!("State publisher stopped");
    }

    /// Full republish after (re)connect: availability, every feature with a
    /// cached value, the last known cover states and discovery documents.
    async fn on_connected(&mut self) {
        self.broker_connected = true;
        self.availability = None;
        self.publish_availability().await;

        let registry = Arc::clone(&self.registry);
        for feature in registry.iter() {
            if let Some(value) = feature.decode(&self.cache) {
                self.publish_feature(feature, value.payload(feature.metadata.precision))
                    .await;
            }
        }

        let statuses: Vec<CoverStatus> = self.last_cover_status.values().cloned().collect();
        for status in statuses {
            self.publish_cover(status).await;
        }

        if let Some(discovery) = &self.discovery {
            discovery
                .publish_all(&self.handle, &registry, &self.covers, &self.cover_circuits)
                .await;
        }
    }

    async fn publish_feature_event(&mut self, event: &FeatureChanged) {
        let registry = Arc::clone(&self.registry);
        let Some(feature) = registry.get(&event.feature_id) else {
            return;
        };
        self.publish_feature(feature, event.new.payload(feature.metadata.precision))
            .await;
    }

    async fn publish_feature(&mut self, feature: &Feature, payload: String) {
        let topic = self.topics.feature_state(feature);
        if let Err(error) = self.handle.publish_retained(&topic, payload.clone()).await {
            tracing::warn!(topic, %error, "State publish failed");
        } else {
            tracing::debug!(topic, payload, "Published state");
        }
    }

    async fn publish_cover(&mut self, status: CoverStatus) {
        let state_topic = self.topics.cover_state(&status.id, status.device_class);
        if let Err(error) = self
            .handle
            .publish_retained(&state_topic, status.state.as_str())
            .await
        {
            tracing::warn!(topic = state_topic, %error, "Cover state publish failed");
        }

        if let Some(position) = status.position {
            let topic = self.topics.cover_position(&status.id, status.device_class);
            let _ = self
                .handle
                .publish_retained(&topic, position.to_string())
                .await;
        }
        if let Some(tilt) = status.tilt {
            let topic = self.topics.cover_tilt(&status.id, status.device_class);
            let _ = self.handle.publish_retained(&topic, tilt.to_string()).await;
        }

        self.last_cover_status.insert(status.id.clone(), status);
    }

    async fn on_transport(&mut self, status: TransportStatus) {
        match status {
            TransportStatus::Online(id) => {
                self.degraded.remove(&id);
            }
            TransportStatus::Offline(id) => {
                self.degraded.insert(id);
            }
        }
        self.publish_availability().await;
    }

    async fn publish_availability(&mut self) {
        let online = self.broker_connected && self.degraded.is_empty();
        if self.availability == Some(online) {
            return;
        }
        self.availability = Some(online);

        let payload = if online { "online" } else { "offline" };
        let topic = self.topics.availability();
        if let Err(error) = self.handle.publish_retained(&topic, payload).await {
            tracing::warn!(topic, %error, "Availability publish failed");
        } else {
            tracing::info!(availability = payload, "Availability published");
        }
    }
}
